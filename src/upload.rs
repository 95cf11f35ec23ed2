use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::http::{find_subsequence, parse_part_headers, HttpRequest, PartInfo};

#[derive(Debug)]
pub enum UploadState {
    InProgress,
    Done,
    Error(u16),
}

#[derive(Debug)]
pub enum MultiPartState {
    Start,
    HeaderSep,
    NextBoundary(usize),
}

/// Drives a single upload (simple body or `multipart/form-data`) to disk as
/// bytes arrive. One instance lives for the lifetime of a connection's
/// upload, across however many reads it takes.
#[derive(Debug)]
pub struct Upload {
    pub state: UploadState,
    pub multi_part_state: MultiPartState,
    pub path: PathBuf,
    pub boundary: String,
    pub buffer: Vec<u8>,
    pub current_pos: usize,
    pub saved_filenames: Vec<String>,
    pub files_saved: usize,
    pub part_info: PartInfo,
    pub current_file_path: Option<PathBuf>,
    next_anonymous: usize,
}

impl Upload {
    pub fn new(path: PathBuf, boundary: &str) -> Self {
        Self {
            state: UploadState::InProgress,
            multi_part_state: MultiPartState::Start,
            path,
            boundary: boundary.to_string(),
            buffer: Vec::new(),
            current_pos: 0,
            saved_filenames: Vec::new(),
            files_saved: 0,
            part_info: PartInfo::default(),
            current_file_path: None,
            next_anonymous: 0,
        }
    }

    fn anonymous_name(&mut self, content_type: &str) -> String {
        let n = self.next_anonymous;
        self.next_anonymous += 1;
        format!("upload_{n}{}", ext_for_content_type(content_type))
    }

    pub fn upload_simple_body(&mut self, req: &HttpRequest, chunk: &[u8]) {
        let target_path = if let Some(ref path) = self.current_file_path {
            path.clone()
        } else {
            let content_type = req.header("content-type").unwrap_or("").to_string();
            let name = self.anonymous_name(&content_type);
            let full_path = Self::get_unique_path(&self.path, &name);
            self.current_file_path = Some(full_path.clone());
            full_path
        };

        match OpenOptions::new().create(true).append(true).open(&target_path) {
            Ok(mut file) => {
                if file.write_all(chunk).is_err() {
                    self.state = UploadState::Error(500);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                self.state = UploadState::Error(403);
            }
            Err(_) => {
                self.state = UploadState::Error(500);
            }
        }
    }

    pub fn upload_body_with_boundry(&mut self, req: &HttpRequest, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        let boundary_str = format!("--{}", self.boundary);
        let boundary_bytes = boundary_str.as_bytes();
        let header_sep = b"\r\n\r\n";

        loop {
            match self.multi_part_state {
                MultiPartState::Start => {
                    match find_subsequence(&self.buffer[self.current_pos..], boundary_bytes) {
                        Some(rel) => {
                            let start_idx = self.current_pos + rel;
                            let part_start = start_idx + boundary_bytes.len() + 2;

                            if self.buffer.len() < part_start {
                                break;
                            }

                            if self.buffer.get(part_start - 2..part_start) == Some(b"--") {
                                self.state = UploadState::Done;
                                break;
                            }

                            self.current_pos = part_start;
                            self.multi_part_state = MultiPartState::HeaderSep;
                        }
                        None => {
                            self.trim_buffer();
                            break;
                        }
                    }
                }

                MultiPartState::HeaderSep => {
                    match find_subsequence(&self.buffer[self.current_pos..], header_sep) {
                        Some(rel) => {
                            let sep_idx = self.current_pos + rel;
                            let data_start = sep_idx + 4;
                            let headers_part =
                                String::from_utf8_lossy(&self.buffer[self.current_pos..data_start]);

                            self.part_info = parse_part_headers(&headers_part);
                            self.multi_part_state = MultiPartState::NextBoundary(data_start);
                            self.current_pos = data_start;
                        }
                        None => break,
                    }
                }

                MultiPartState::NextBoundary(data_start) => {
                    match find_subsequence(&self.buffer[data_start..], boundary_bytes) {
                        Some(rel) => {
                            let next_boundary_idx = data_start + rel;
                            let mut data_end = next_boundary_idx;
                            if next_boundary_idx >= 2
                                && &self.buffer[next_boundary_idx - 2..next_boundary_idx] == b"\r\n"
                            {
                                data_end -= 2;
                            }

                            if self.part_info.filename.is_some() {
                                self.save_file_part(data_start, data_end);
                            }

                            self.buffer.drain(..next_boundary_idx);
                            self.current_pos = 0;
                            self.current_file_path = None;
                            self.multi_part_state = MultiPartState::Start;
                        }
                        None => {
                            self.flush_partial_data(data_start);
                            break;
                        }
                    }
                }
            }
        }

        let _ = req;
    }

    fn flush_partial_data(&mut self, data_start: usize) {
        let safety_margin = self.boundary.len() + 10;

        if self.buffer.len() > (data_start + safety_margin) {
            let write_end = self.buffer.len() - safety_margin;
            let data_to_write = &self.buffer[data_start..write_end];

            let target_path = if let Some(ref path) = self.current_file_path {
                path.clone()
            } else {
                let name = self.part_filename();
                let unique = Self::get_unique_path(&self.path, &name);
                self.current_file_path = Some(unique.clone());
                unique
            };

            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&target_path) {
                let _ = file.write_all(data_to_write);
            }

            self.buffer.drain(data_start..write_end);
            self.multi_part_state = MultiPartState::NextBoundary(data_start);
            self.current_pos = data_start;
        }
    }

    fn part_filename(&mut self) -> String {
        let raw_fname = self.part_info.filename.clone().unwrap_or_default();
        if raw_fname.is_empty() {
            self.anonymous_name(&self.part_info.content_type.clone())
        } else {
            Self::sanitize_filename(&raw_fname)
        }
    }

    fn trim_buffer(&mut self) {
        let b_len = self.boundary.len() + 4;
        if self.buffer.len() > b_len {
            let drain_to = self.buffer.len() - b_len;
            self.buffer.drain(..drain_to);
            self.current_pos = 0;
        }
    }

    fn save_file_part(&mut self, data_start: usize, data_end: usize) {
        let data = &self.buffer[data_start..data_end];

        let final_path = if let Some(path) = self.current_file_path.take() {
            path
        } else {
            let name = self.part_filename();
            Self::get_unique_path(&self.path, &name)
        };

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&final_path) {
            if file.write_all(data).is_ok() {
                self.files_saved += 1;
                self.saved_filenames.push(
                    final_path.file_name().unwrap().to_string_lossy().into_owned(),
                );
            }
        }

        self.current_file_path = None;
    }

    fn get_unique_path(directory: &Path, filename: &str) -> PathBuf {
        let mut full_path = directory.join(filename);
        let mut counter = 1;

        while full_path.exists() {
            let stem = Path::new(filename).file_stem().and_then(|s| s.to_str()).unwrap_or("file");
            let ext = Path::new(filename).extension().and_then(|s| s.to_str()).unwrap_or("");

            let new_name = if ext.is_empty() {
                format!("{stem}_{counter}")
            } else {
                format!("{stem}_{counter}.{ext}")
            };

            full_path = directory.join(new_name);
            counter += 1;
        }
        full_path
    }

    pub fn sanitize_filename(name: &str) -> String {
        let path = Path::new(name);
        let raw_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("default_upload");

        let sanitized: String = raw_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
            .collect();

        if sanitized.is_empty() || sanitized.starts_with('.') {
            format!("upload_{sanitized}")
        } else {
            sanitized
        }
    }
}

/// Finalizes the response once the connection layer has decided the body is
/// fully read: 201 with the saved name(s), or a 500 if nothing was saved.
pub fn finish_upload_response(response: &mut crate::http::HttpResponse, upload: &mut Upload) {
    if upload.boundary.is_empty() {
        if let Some(target_path) = &upload.current_file_path {
            upload.saved_filenames.push(
                target_path.file_name().unwrap().to_string_lossy().into_owned(),
            );
            upload.files_saved += 1;
        }
    }

    if upload.saved_filenames.is_empty() {
        *response = crate::http::error_response(500, None, None);
        return;
    }

    response.set_status_code(201);
    if upload.saved_filenames.len() == 1 {
        response.set_header("location", format!("/upload/{}", upload.saved_filenames[0]));
        response.set_body(
            format!("File saved as {}", upload.saved_filenames[0]).into_bytes(),
            "text/plain",
        );
    } else {
        let body_msg = format!("Saved files: {}", upload.saved_filenames.join(", "));
        response.set_body(body_msg.into_bytes(), "text/plain");
    }
}

fn ext_for_content_type(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "text/plain" => ".txt",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        _ => ".bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> HttpRequest {
        HttpRequest::new()
    }

    #[test]
    fn simple_body_creates_and_appends_file() {
        let dir = std::env::temp_dir().join(format!("upload_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut upload = Upload::new(dir.clone(), "");
        let req = sample_request();
        upload.upload_simple_body(&req, b"hello ");
        upload.upload_simple_body(&req, b"world");
        let path = upload.current_file_path.clone().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "hello world");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn sanitize_filename_strips_directory_and_unsafe_chars() {
        assert_eq!(Upload::sanitize_filename("../etc/passwd"), "passwd");
        assert_eq!(Upload::sanitize_filename("my file (1).txt"), "my_file__1_.txt");
    }

    #[test]
    fn multipart_boundary_completion_marks_done() {
        let dir = std::env::temp_dir().join(format!("upload_test_mp_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut upload = Upload::new(dir.clone(), "BOUNDARY");
        let req = sample_request();
        let body = b"--BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhi\r\n--BOUNDARY--\r\n";
        upload.upload_body_with_boundry(&req, body);
        assert!(matches!(upload.state, UploadState::Done));
        assert_eq!(upload.saved_filenames, vec!["a.txt".to_string()]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
