use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use crate::config::{RouteConfig, ServerConfig};
use crate::connection::ActiveAction;
use crate::http::{error_response, generate_autoindex, mime_type_for_path, HttpRequest, HttpResponse};

/// Serves a static file or directory listing for GET/HEAD. `is_head`
/// suppresses the body (headers only, per SPEC_FULL.md §4.E step 11) but the
/// returned `ActiveAction` is always `None` for HEAD since no file streaming
/// is needed.
pub fn handle_get(
    request: &HttpRequest,
    response: &mut HttpResponse,
    r_cfg: Option<&RouteConfig>,
    s_cfg: &ServerConfig,
    is_head: bool,
) -> ActiveAction {
    let root = s_cfg.effective_root(r_cfg);
    let prefix = r_cfg.map(|r| r.prefix.as_str()).unwrap_or("/");
    let relative = request.path.strip_prefix(prefix).unwrap_or(&request.path);

    let mut path = PathBuf::from(root);
    path.push(relative.trim_start_matches('/'));

    if path.is_dir() {
        let index_path = path.join(&s_cfg.index);
        if index_path.is_file() {
            path = index_path;
        } else if s_cfg.effective_autoindex(r_cfg) {
            let listing = generate_autoindex(&path, &request.path);
            *response = listing;
            if is_head {
                response.body.clear();
            }
            return ActiveAction::None;
        } else {
            *response = error_response(404, Some(s_cfg), s_cfg.effective_error_page(r_cfg, 404));
            return ActiveAction::None;
        }
    }

    match File::open(&path) {
        Ok(file) => {
            let Ok(metadata) = file.metadata() else {
                *response = error_response(500, Some(s_cfg), s_cfg.effective_error_page(r_cfg, 500));
                return ActiveAction::None;
            };
            if !metadata.is_file() {
                *response = error_response(415, Some(s_cfg), s_cfg.effective_error_page(r_cfg, 415));
                return ActiveAction::None;
            }
            let size = metadata.size() as usize;
            response.set_status_code(200);
            response.set_header("content-length", size.to_string());
            response.set_header("content-type", mime_type_for_path(&path));

            if is_head {
                ActiveAction::None
            } else {
                ActiveAction::FileDownload { file, remaining: size }
            }
        }
        Err(e) => {
            let code = match e.kind() {
                std::io::ErrorKind::NotFound => 404,
                std::io::ErrorKind::PermissionDenied => 403,
                _ => 500,
            };
            *response = error_response(code, Some(s_cfg), s_cfg.effective_error_page(r_cfg, code));
            ActiveAction::None
        }
    }
}
