//! Message codes
//!
//! A code is a single byte split into a 3-bit class and a 5-bit detail,
//! rendered as `c.dd`. Requests live in class 0, responses in classes 2, 4
//! and 5, and stream signaling messages in class 7.

use std::fmt;

/// Request method, response status or signaling code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0);

    // Requests
    pub const GET: Code = Code(1);
    pub const POST: Code = Code(2);
    pub const PUT: Code = Code(3);
    pub const DELETE: Code = Code(4);
    pub const FETCH: Code = Code(5);
    pub const PATCH: Code = Code(6);
    pub const IPATCH: Code = Code(7);

    // 2.xx success
    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);
    pub const CONTINUE: Code = Code::new(2, 31);

    // 4.xx client error
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const FORBIDDEN: Code = Code::new(4, 3);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const NOT_ACCEPTABLE: Code = Code::new(4, 6);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code::new(4, 8);
    pub const CONFLICT: Code = Code::new(4, 9);
    pub const PRECONDITION_FAILED: Code = Code::new(4, 12);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);
    pub const UNSUPPORTED_MEDIA_TYPE: Code = Code::new(4, 15);

    // 5.xx server error
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);
    pub const BAD_GATEWAY: Code = Code::new(5, 2);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);
    pub const GATEWAY_TIMEOUT: Code = Code::new(5, 4);
    pub const PROXYING_NOT_SUPPORTED: Code = Code::new(5, 5);

    // 7.xx stream signaling
    pub const CSM: Code = Code::new(7, 1);
    pub const PING: Code = Code::new(7, 2);
    pub const PONG: Code = Code::new(7, 3);
    pub const RELEASE: Code = Code::new(7, 4);
    pub const ABORT: Code = Code::new(7, 5);

    /// Build a code from its class and detail parts
    pub const fn new(class: u8, detail: u8) -> Self {
        Code((class << 5) | (detail & 0x1f))
    }

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_request(self) -> bool {
        self.class() == 0 && self.0 != 0
    }

    pub const fn is_response(self) -> bool {
        matches!(self.class(), 2..=5)
    }

    pub const fn is_signaling(self) -> bool {
        self.class() == 7
    }

    /// Registered name of the code, if it has one
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Code::EMPTY => "Empty",
            Code::GET => "GET",
            Code::POST => "POST",
            Code::PUT => "PUT",
            Code::DELETE => "DELETE",
            Code::FETCH => "FETCH",
            Code::PATCH => "PATCH",
            Code::IPATCH => "iPATCH",
            Code::CREATED => "Created",
            Code::DELETED => "Deleted",
            Code::VALID => "Valid",
            Code::CHANGED => "Changed",
            Code::CONTENT => "Content",
            Code::CONTINUE => "Continue",
            Code::BAD_REQUEST => "BadRequest",
            Code::UNAUTHORIZED => "Unauthorized",
            Code::BAD_OPTION => "BadOption",
            Code::FORBIDDEN => "Forbidden",
            Code::NOT_FOUND => "NotFound",
            Code::METHOD_NOT_ALLOWED => "MethodNotAllowed",
            Code::NOT_ACCEPTABLE => "NotAcceptable",
            Code::REQUEST_ENTITY_INCOMPLETE => "RequestEntityIncomplete",
            Code::CONFLICT => "Conflict",
            Code::PRECONDITION_FAILED => "PreconditionFailed",
            Code::REQUEST_ENTITY_TOO_LARGE => "RequestEntityTooLarge",
            Code::UNSUPPORTED_MEDIA_TYPE => "UnsupportedMediaType",
            Code::INTERNAL_SERVER_ERROR => "InternalServerError",
            Code::NOT_IMPLEMENTED => "NotImplemented",
            Code::BAD_GATEWAY => "BadGateway",
            Code::SERVICE_UNAVAILABLE => "ServiceUnavailable",
            Code::GATEWAY_TIMEOUT => "GatewayTimeout",
            Code::PROXYING_NOT_SUPPORTED => "ProxyingNotSupported",
            Code::CSM => "CSM",
            Code::PING => "Ping",
            Code::PONG => "Pong",
            Code::RELEASE => "Release",
            Code::ABORT => "Abort",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u8> for Code {
    fn from(value: u8) -> Self {
        Code(value)
    }
}

impl From<Code> for u8 {
    fn from(code: Code) -> Self {
        code.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}.{:02} {}", self.class(), self.detail(), name),
            None => write!(f, "{}.{:02}", self.class(), self.detail()),
        }
    }
}
