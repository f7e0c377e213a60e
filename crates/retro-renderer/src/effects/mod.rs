// ABOUTME: Effect contract for the post-processing chain and the built-in effect catalog.
// ABOUTME: Effects run fail-soft: a failed apply reports Skipped instead of erroring out.

mod bloom;
mod dither;
mod tint;

pub use bloom::BloomEffect;
pub use dither::DitherEffect;
pub use tint::TintEffect;

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use retro_core::{EffectKind, Size};

use crate::backend::{BackendError, RenderBackend, Target};

#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Failed(String),
}

/// Outcome of one `Effect::apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    Applied,
    /// The output was not written; the chain keeps its current image
    Skipped(String),
}

impl ApplyStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyStatus::Applied)
    }
}

impl<E: fmt::Display> From<Result<(), E>> for ApplyStatus {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ApplyStatus::Applied,
            Err(e) => ApplyStatus::Skipped(e.to_string()),
        }
    }
}

/// Per-frame data handed to every effect
pub struct FrameContext<'a, B: RenderBackend> {
    /// The untouched scene buffer for this frame
    pub scene: &'a B::Texture,
    pub render_size: Size,
}

/// Registry entry metadata: lookup key, kind tag, enabled flag and ordering key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectDescriptor {
    pub name: String,
    pub kind: EffectKind,
    pub enabled: bool,
    /// Ascending priority runs earlier; ties run in insertion order
    pub priority: i32,
}

impl EffectDescriptor {
    pub fn new(name: impl Into<String>, kind: EffectKind, priority: i32) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            priority,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// One image transform in the post-processing chain.
///
/// `apply` reads `input` and writes `output`, which never alias. An effect that
/// cannot produce its output returns `ApplyStatus::Skipped` and leaves the chain
/// to carry the previous image forward.
pub trait Effect<B: RenderBackend> {
    fn kind(&self) -> EffectKind {
        EffectKind::Custom
    }

    /// Load programs and size-dependent resources. Called again after `dispose`.
    fn initialize(&mut self, backend: &mut B, resolution: Size) -> Result<(), EffectError>;

    fn apply(
        &mut self,
        backend: &mut B,
        frame: &FrameContext<'_, B>,
        input: &B::Texture,
        output: Target<'_, B::Texture>,
    ) -> ApplyStatus;

    /// Release owned resources; must tolerate repeated calls
    fn dispose(&mut self, _backend: &mut B) {}
}

/// Shared, type-erased effect as stored in the chain
pub type SharedEffect<B> = Rc<RefCell<dyn Effect<B>>>;

/// Typed handle to an effect living in the chain.
///
/// Parameter changes made through the handle are seen by the next frame.
pub struct EffectHandle<E> {
    inner: Rc<RefCell<E>>,
}

impl<E> EffectHandle<E> {
    pub(crate) fn new(effect: E) -> Self {
        Self {
            inner: Rc::new(RefCell::new(effect)),
        }
    }

    pub(crate) fn shared(&self) -> Rc<RefCell<E>> {
        Rc::clone(&self.inner)
    }

    pub fn borrow(&self) -> Ref<'_, E> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, E> {
        self.inner.borrow_mut()
    }

    pub fn try_borrow_mut(&self) -> Option<RefMut<'_, E>> {
        self.inner.try_borrow_mut().ok()
    }

    /// True when both handles point at the same effect instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E> Clone for EffectHandle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for EffectHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EffectHandle").field(&self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_converts_to_status() {
        let ok: Result<(), EffectError> = Ok(());
        assert_eq!(ApplyStatus::from(ok), ApplyStatus::Applied);

        let err: Result<(), EffectError> = Err(EffectError::Failed("boom".into()));
        assert_eq!(
            ApplyStatus::from(err),
            ApplyStatus::Skipped("boom".to_string())
        );
    }

    #[test]
    fn handle_clones_share_instance() {
        let a = EffectHandle::new(5u32);
        let b = a.clone();
        *b.borrow_mut() = 7;
        assert_eq!(*a.borrow(), 7);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&EffectHandle::new(7u32)));
    }
}
