use shared::ChatId;

/// Side effects the chat streamer asks the surrounding UI to perform.
///
/// Every method defaults to doing nothing so a front end only implements
/// what it actually renders.
pub trait ChatUiHooks: Send + Sync {
    /// Reload the rendered app in the preview pane.
    fn refresh_app_iframe(&self) {}

    fn check_problems(&self) {}

    /// Files were written that the response did not announce.
    fn show_extra_files(&self, _files: &[String], _error: Option<&str>) {}

    fn refresh_proposal(&self, _chat_id: ChatId) {}

    fn refetch_user_budget(&self) {}

    fn refresh_chats(&self) {}

    fn refresh_app(&self) {}

    fn refresh_versions(&self) {}

    fn count_tokens(&self, _chat_id: ChatId, _input: &str) {}
}

pub struct NoopHooks;

impl ChatUiHooks for NoopHooks {}
