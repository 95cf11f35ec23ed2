use crate::connection::ActiveAction;
use crate::http::{HttpRequest, ParseError};
use crate::upload::{Upload, UploadState};

/// Feeds `to_process` bytes starting at `start` in `request.buffer` into the
/// active upload, creating the `Upload` state machine on first call.
pub fn execute_active_action(
    request: &HttpRequest,
    upload_manager: &mut Option<Upload>,
    action: &mut ActiveAction,
    start: usize,
    to_process: usize,
    boundary: &str,
) -> Result<(), ParseError> {
    let chunk = &request.buffer[start..start + to_process];
    if let ActiveAction::Upload(upload_path) = action {
        if upload_manager.is_none() {
            *upload_manager = Some(Upload::new(upload_path.clone(), boundary));
        }

        if let Some(mgr) = upload_manager {
            if boundary.is_empty() {
                mgr.upload_simple_body(request, chunk);
            } else {
                mgr.upload_body_with_boundry(request, chunk);
            }
            if let UploadState::Error(code) = mgr.state {
                return Err(ParseError::Status(code));
            }
        }
    }

    Ok(())
}
