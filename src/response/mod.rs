//! Response collection: allow-lists, decoding, the response item and its log

pub mod allowed;
pub mod decoder;
pub mod error;
pub mod log;
pub mod response_box;

pub use allowed::{AllowedResponseSet, CorrectResponses, DEFAULT_ALLOWED_RESPONSES};
pub use decoder::{decode, decode_button, Correctness, DecodedResponse, RawEvent, ResponseCode, ResponseSource};
pub use error::ResponseError;
pub use log::{ResponseLog, ResponseRecord, ResponseSink};
pub use response_box::{list_response_boxes, CollectedResponse, ResponseBox, ResponseOutcome, RESPONSE_BOX_FILTER};
