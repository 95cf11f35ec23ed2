pub mod method;
pub mod request;
pub mod response;
pub mod status;

pub use method::Method;
pub use request::{
    find_subsequence, parse_part_headers, split_path_info, ChunkState, HttpRequest, ParseError,
    ParsingState, PartInfo,
};
pub use response::{error_response, generate_autoindex, mime_type_for_path, HttpResponse};
pub use status::{mime_for_extension, status_text};
