//! # Messages
//!
//! ## Purpose
//!
//! Two message shapes share one capability interface, [`CoapMessage`]:
//!
//! - [`Message`]: owned, framing-independent, safe to keep around. This is
//!   what applications build and what pooled messages convert to and from.
//! - [`MessageBase`]: the mutable container a pooled message composes. It
//!   tracks whether any field changed since the last reset so upper layers
//!   can tell a handler-touched response from an untouched one.

use crate::body::Body;
use crate::code::Code;
use crate::context::Context;
use crate::error::{TypesError, TypesResult};
use crate::options::{OptionId, Options};
use bytes::Bytes;
use rand::RngCore;
use std::fmt;
use std::io;

/// Opaque request/response correlation value
pub type Token = Bytes;

/// Tokens are limited by the 4-bit TKL header field (9-15 are reserved)
pub const MAX_TOKEN_SIZE: usize = 8;

/// Random token of the maximum length
pub fn generate_token() -> Token {
    let mut token = [0u8; MAX_TOKEN_SIZE];
    rand::thread_rng().fill_bytes(&mut token);
    Bytes::copy_from_slice(&token)
}

/// Capability interface over code, token, options, body and modified flag
pub trait CoapMessage {
    fn code(&self) -> Code;
    fn set_code(&mut self, code: Code);

    fn token(&self) -> Option<&Token>;
    fn set_token(&mut self, token: Option<Token>);

    fn options(&self) -> &Options;
    /// Mutable options; marks the message modified
    fn options_mut(&mut self) -> &mut Options;

    fn body(&self) -> Option<&Body>;
    fn body_mut(&mut self) -> Option<&mut Body>;
    fn set_body(&mut self, body: Option<Body>);

    fn is_modified(&self) -> bool;
    fn set_modified(&mut self, modified: bool);
}

/// Owned message not tied to any pool
#[derive(Debug, Default)]
pub struct Message {
    pub context: Option<Context>,
    pub code: Code,
    pub token: Option<Token>,
    pub options: Options,
    pub body: Option<Body>,
}

impl Message {
    pub fn new(context: Context, code: Code) -> Self {
        Self {
            context: Some(context),
            code,
            ..Default::default()
        }
    }
}

impl CoapMessage for Message {
    fn code(&self) -> Code {
        self.code
    }

    fn set_code(&mut self, code: Code) {
        self.code = code;
    }

    fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    fn set_token(&mut self, token: Option<Token>) {
        self.token = token;
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    fn set_body(&mut self, body: Option<Body>) {
        self.body = body;
    }

    fn is_modified(&self) -> bool {
        false
    }

    fn set_modified(&mut self, _modified: bool) {}
}

/// Mutable container with modification tracking
#[derive(Debug, Default)]
pub struct MessageBase {
    code: Code,
    token: Option<Token>,
    options: Options,
    body: Option<Body>,
    modified: bool,
}

impl MessageBase {
    pub fn new() -> Self {
        Self {
            options: Options::with_capacity(16),
            ..Default::default()
        }
    }

    /// Empty every field; the option allocation is kept for reuse
    pub fn reset(&mut self) {
        self.code = Code::EMPTY;
        self.token = None;
        self.options.clear();
        self.body = None;
        self.modified = false;
    }

    pub fn reset_options_to(&mut self, options: &Options) {
        self.options.reset_to(options);
        self.modified = true;
    }

    pub fn add_option(&mut self, id: OptionId, value: impl Into<Bytes>) -> TypesResult<()> {
        self.options.add(id, value)?;
        self.modified = true;
        Ok(())
    }

    pub fn set_option(&mut self, id: OptionId, value: impl Into<Bytes>) -> TypesResult<()> {
        self.options.set(id, value)?;
        self.modified = true;
        Ok(())
    }

    pub fn remove_option(&mut self, id: OptionId) {
        if self.options.remove(id) > 0 {
            self.modified = true;
        }
    }

    /// Replace Uri-Path with the segments of `path`
    pub fn set_path(&mut self, path: &str) -> TypesResult<()> {
        self.options.remove(OptionId::URI_PATH);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options
                .add(OptionId::URI_PATH, Bytes::copy_from_slice(segment.as_bytes()))?;
        }
        self.modified = true;
        Ok(())
    }

    /// Uri-Path segments joined with a leading `/`
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in self.options.get_all(OptionId::URI_PATH) {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(segment));
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }

    pub fn set_content_format(&mut self, format: u32) -> TypesResult<()> {
        self.options.set_uint(OptionId::CONTENT_FORMAT, format)?;
        self.modified = true;
        Ok(())
    }

    pub fn content_format(&self) -> TypesResult<Option<u32>> {
        self.options.get_uint(OptionId::CONTENT_FORMAT)
    }

    /// Validate and store the token
    pub fn try_set_token(&mut self, token: Option<Token>) -> TypesResult<()> {
        if let Some(token) = &token {
            if token.len() > MAX_TOKEN_SIZE {
                return Err(TypesError::TokenTooLong {
                    size: token.len(),
                    limit: MAX_TOKEN_SIZE,
                });
            }
        }
        self.set_token(token);
        Ok(())
    }

    /// Whole body from the start, or empty bytes when there is none
    pub fn read_body(&mut self) -> io::Result<Bytes> {
        match &mut self.body {
            Some(body) => body.read_all(),
            None => Ok(Bytes::new()),
        }
    }

    pub fn body_size(&mut self) -> io::Result<u64> {
        match &mut self.body {
            Some(body) => body.size(),
            None => Ok(0),
        }
    }
}

impl CoapMessage for MessageBase {
    fn code(&self) -> Code {
        self.code
    }

    fn set_code(&mut self, code: Code) {
        self.code = code;
        self.modified = true;
    }

    fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    fn set_token(&mut self, token: Option<Token>) {
        self.token = token;
        self.modified = true;
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn options_mut(&mut self) -> &mut Options {
        self.modified = true;
        &mut self.options
    }

    fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    fn set_body(&mut self, body: Option<Body>) {
        self.body = body;
        self.modified = true;
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }
}

impl fmt::Display for MessageBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code: {}, ", self.code)?;
        match &self.token {
            Some(token) => write!(f, "Token: {}, ", hex::encode(token))?,
            None => f.write_str("Token: none, ")?,
        }
        write!(f, "Path: {}, Options: {}", self.path(), self.options)?;
        if let Some(body) = &self.body {
            match body.as_bytes() {
                Some(bytes) => write!(f, ", Body: {} bytes", bytes.len())?,
                None => f.write_str(", Body: reader")?,
            }
        }
        Ok(())
    }
}
