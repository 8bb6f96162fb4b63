//! Lifecycle signals from the hosting context.
//!
//! Sensors are suspended while the context is hidden or while a
//! cross-origin frame holds focus, and resumed once neither applies.

use async_trait::async_trait;

/// Transition produced by a lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    Suspend,
    Resume,
}

/// Combined visibility and focus state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleState {
    hidden: bool,
    focus_stolen: bool,
}

impl LifecycleState {
    pub const fn is_suspended(self) -> bool {
        self.hidden || self.focus_stolen
    }

    pub fn set_hidden(&mut self, hidden: bool) -> Option<LifecycleTransition> {
        self.update(|s| s.hidden = hidden)
    }

    pub fn set_focus_stolen(&mut self, stolen: bool) -> Option<LifecycleTransition> {
        self.update(|s| s.focus_stolen = stolen)
    }

    fn update(&mut self, change: impl FnOnce(&mut Self)) -> Option<LifecycleTransition> {
        let before = self.is_suspended();
        change(self);
        match (before, self.is_suspended()) {
            (false, true) => Some(LifecycleTransition::Suspend),
            (true, false) => Some(LifecycleTransition::Resume),
            _ => None,
        }
    }
}

/// Hooks a lifecycle monitor calls.
///
/// Implementations must deliver the resulting suspend and resume signals in
/// call order, even when visibility and focus change concurrently.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// The hosting context became hidden (`true`) or visible (`false`).
    async fn on_visibility_change(&self, hidden: bool);

    /// A cross-origin frame took (`true`) or gave back (`false`) focus.
    async fn on_focus_stolen(&self, stolen: bool);
}
