use async_trait::async_trait;

/// The local user's answer to an incoming call prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDecision {
    Accept,
    Decline,
}

/// Presentation hooks for call state.
///
/// "Outgoing" covers every in-call state without remote audio yet.
#[async_trait]
pub trait CallUi: Send + Sync {
    fn show_outgoing_ui(&self);

    fn show_active_ui(&self);

    fn show_idle_ui(&self);

    /// Asks the user whether to take a call. May stay pending indefinitely.
    async fn prompt_incoming_call(&self, caller_name: &str) -> CallDecision;

    fn report_error(&self, message: &str);
}
