//! Request-sequence tokens.
//!
//! Every remote call that replaces local state takes a token before it is
//! sent. When its response arrives it is applied only if no newer call of the
//! same kind was issued in the meantime; otherwise it is dropped.

use std::collections::HashMap;

/// Kinds of remote calls whose responses overwrite the local cart snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    LoadCart,
    MutateCart,
    PaymentIntent,
    TicketTypes,
}

/// Token handed out for one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken {
    kind: RequestKind,
    seq: u64,
}

impl RequestToken {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

#[derive(Debug, Default)]
pub struct RequestSequencer {
    next: u64,
    latest: HashMap<RequestKind, u64>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a token, superseding every earlier token of the same kind.
    pub fn issue(&mut self, kind: RequestKind) -> RequestToken {
        self.next += 1;
        self.latest.insert(kind, self.next);
        RequestToken {
            kind,
            seq: self.next,
        }
    }

    /// Whether a response carrying `token` may still be applied.
    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest.get(&token.kind) == Some(&token.seq)
    }

    /// Supersedes every outstanding token, e.g. when the cart is discarded.
    pub fn invalidate_all(&mut self) {
        self.next += 1;
        for seq in self.latest.values_mut() {
            *seq = self.next;
        }
    }
}
