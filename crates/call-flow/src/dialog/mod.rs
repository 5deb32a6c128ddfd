//! Per-call dialog state
//!
//! One [`Dialog`] per endpoint holds the correlation state of the current
//! call:
//!
//! ```text
//!   call_id      set by INVITE (client) or by the inbound request (server)
//!   local_tag    our From tag (client) / To tag (server)
//!   remote_tag   unset until a tagged 2xx (client) or a tagged From (server)
//!   cseq         next local sequence number, +1 per submitted request
//!   current      the exchange in flight, by id and branch only
//! ```
//!
//! The counter never decreases except through [`Dialog::clear`], which
//! replaces the whole value at once.

use crate::transaction::ExchangeId;

/// Weak reference to the exchange currently in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRef {
    pub branch: String,
    /// `None` between building the request and the layer accepting it
    pub id: Option<ExchangeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dialog {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: Option<String>,
    cseq: u32,
    current: Option<ExchangeRef>,
}

impl Dialog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new call on this dialog
    ///
    /// Replaces the call identity and forgets the old remote tag. The
    /// sequence counter carries over so that it never goes backwards.
    pub fn begin_call(&mut self, call_id: String, local_tag: String, branch: String) {
        self.call_id = call_id;
        self.local_tag = local_tag;
        self.remote_tag = None;
        self.current = Some(ExchangeRef { branch, id: None });
    }

    /// Record an inbound request on the server side
    ///
    /// The counter and any client exchange are left alone: they belong to
    /// requests this endpoint sends.
    pub fn accept_call(&mut self, call_id: String, local_tag: String, remote_tag: Option<String>) {
        self.call_id = call_id;
        self.local_tag = local_tag;
        self.remote_tag = remote_tag;
    }

    /// Start a new exchange inside the current call
    pub fn begin_exchange(&mut self, branch: String) {
        self.current = Some(ExchangeRef { branch, id: None });
    }

    /// The layer accepted the request: remember its exchange and consume one
    /// sequence number
    ///
    /// The counter stops at `u32::MAX`; [`Dialog::next_cseq`] refuses to hand
    /// that value out, so it never wraps.
    pub fn exchange_submitted(&mut self, id: ExchangeId) {
        if let Some(current) = self.current.as_mut() {
            current.id = Some(id);
        }
        self.cseq = self.cseq.saturating_add(1);
    }

    /// Sequence number the next request will carry
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Sequence number for the next request, or `None` once the counter is
    /// exhausted
    pub fn next_cseq(&self) -> Option<u32> {
        self.cseq.checked_add(1).map(|_| self.cseq)
    }

    pub fn current_exchange(&self) -> Option<&ExchangeRef> {
        self.current.as_ref()
    }

    pub fn set_remote_tag(&mut self, tag: impl Into<String>) {
        self.remote_tag = Some(tag.into());
    }

    /// `remote_tag`, or the empty string meaning "no tag yet"
    pub fn remote_tag_or_empty(&self) -> &str {
        self.remote_tag.as_deref().unwrap_or("")
    }

    /// Reset every field at once
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_established(&self) -> bool {
        !self.call_id.is_empty() && self.remote_tag.is_some()
    }
}
