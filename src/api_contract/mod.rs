pub mod envelope;

pub use envelope::{error_response, render_error_envelope, success};
