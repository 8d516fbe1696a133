pub mod client;
pub mod parse;
pub mod prompts;

#[cfg(test)]
pub(crate) mod stub;

pub use client::{ApiFlavor, GenerationMode, HttpTextGenerator, TextGenerator};
pub use parse::{extract_json_object, parse_rewrite_reply, RewriteReply};
