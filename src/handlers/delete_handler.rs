use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::config::{RouteConfig, ServerConfig};
use crate::http::{error_response, HttpRequest, HttpResponse};

/// Deletes a file under the matched location's upload directory. Rejects
/// anything that canonicalizes outside that directory (path traversal) or
/// that is a directory itself.
pub fn handle_delete(
    request: &HttpRequest,
    r_cfg: &RouteConfig,
    s_cfg: &ServerConfig,
) -> HttpResponse {
    let root = s_cfg.effective_root(Some(r_cfg));
    let upload_dir = r_cfg.upload_dir.as_deref().unwrap_or("");
    let upload_base = PathBuf::from(root).join(upload_dir);

    let relative = request.path.strip_prefix(&r_cfg.prefix).unwrap_or("");
    let target_path = upload_base.join(relative.trim_start_matches('/'));

    let absolute_upload_base = match upload_base.canonicalize() {
        Ok(p) => p,
        Err(_) => return error_response(404, Some(s_cfg), s_cfg.effective_error_page(Some(r_cfg), 404)),
    };

    let absolute_target = match target_path.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::NotFound => 404,
                _ => 403,
            };
            return error_response(code, Some(s_cfg), s_cfg.effective_error_page(Some(r_cfg), code));
        }
    };

    if !absolute_target.starts_with(&absolute_upload_base) || absolute_target.is_dir() {
        return error_response(403, Some(s_cfg), s_cfg.effective_error_page(Some(r_cfg), 403));
    }

    match fs::remove_file(&absolute_target) {
        Ok(()) => {
            let mut res = HttpResponse::new(200);
            res.set_body(b"File deleted successfully.".to_vec(), "text/plain");
            res
        }
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::PermissionDenied => 403,
                _ => 500,
            };
            error_response(code, Some(s_cfg), s_cfg.effective_error_page(Some(r_cfg), code))
        }
    }
}
