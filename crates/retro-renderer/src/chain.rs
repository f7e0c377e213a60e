// ABOUTME: Priority-ordered effect chain with ping-pong scratch buffers.
// ABOUTME: Failed effects are skipped for the frame; the final output is always drawn.

use std::rc::Rc;

use crate::backend::{BackendError, DrawOptions, RenderBackend, Target};
use crate::effects::{
    ApplyStatus, Effect, EffectDescriptor, EffectHandle, FrameContext, SharedEffect,
};
use crate::pass::Pass;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("An effect named '{0}' is already registered")]
    DuplicateName(String),

    #[error("No effect named '{0}'")]
    UnknownEffect(String),
}

/// Two equally sized buffers effects alternate between
pub struct ScratchPair<T> {
    buffers: [T; 2],
}

impl<T> ScratchPair<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            buffers: [first, second],
        }
    }

    pub fn get(&self, index: usize) -> &T {
        &self.buffers[index]
    }

    pub fn into_inner(self) -> [T; 2] {
        self.buffers
    }
}

/// Image currently holding the chain's latest result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Scene,
    Scratch(usize),
}

impl Source {
    /// Scratch slot that is safe to write while reading `self`
    fn write_slot(self) -> usize {
        match self {
            Source::Scene => 0,
            Source::Scratch(index) => 1 - index,
        }
    }
}

struct ChainEntry<B: RenderBackend> {
    descriptor: EffectDescriptor,
    seq: u64,
    effect: SharedEffect<B>,
    initialized: bool,
    /// Reason of the current failure streak, if any
    failure: Option<String>,
}

impl<B: RenderBackend> ChainEntry<B> {
    fn order_key(&self) -> (i32, u64) {
        (self.descriptor.priority, self.seq)
    }

    fn run(
        &mut self,
        backend: &mut B,
        frame: &FrameContext<'_, B>,
        input: &B::Texture,
        output: Target<'_, B::Texture>,
    ) -> ApplyStatus {
        let Ok(mut effect) = self.effect.try_borrow_mut() else {
            return ApplyStatus::Skipped("effect is borrowed elsewhere".to_string());
        };
        if !self.initialized {
            if let Err(e) = effect.initialize(backend, frame.render_size) {
                return ApplyStatus::Skipped(format!("initialization failed: {e}"));
            }
            self.initialized = true;
        }
        effect.apply(backend, frame, input, output)
    }

    fn record(&mut self, status: &ApplyStatus) {
        let name = &self.descriptor.name;
        match status {
            ApplyStatus::Applied => {
                if self.failure.take().is_some() {
                    tracing::info!("Effect '{}' recovered", name);
                }
            }
            ApplyStatus::Skipped(reason) => {
                if self.failure.as_deref() == Some(reason.as_str()) {
                    tracing::debug!("Effect '{}' still skipped: {}", name, reason);
                } else {
                    tracing::warn!("Skipping effect '{}': {}", name, reason);
                    self.failure = Some(reason.clone());
                }
            }
        }
    }

    fn dispose(&mut self, backend: &mut B) {
        match self.effect.try_borrow_mut() {
            Ok(mut effect) => effect.dispose(backend),
            Err(_) => tracing::warn!(
                "Effect '{}' is borrowed; its resources are not released",
                self.descriptor.name
            ),
        }
        self.initialized = false;
    }
}

/// Ordered collection of effects executed once per frame
pub struct EffectChain<B: RenderBackend> {
    entries: Vec<ChainEntry<B>>,
    next_seq: u64,
}

impl<B: RenderBackend> Default for EffectChain<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RenderBackend> EffectChain<B> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    /// Register an effect; it is initialized lazily on its first execution
    pub fn add_effect<E: Effect<B> + 'static>(
        &mut self,
        descriptor: EffectDescriptor,
        effect: E,
    ) -> Result<EffectHandle<E>, ChainError> {
        if self.contains(&descriptor.name) {
            return Err(ChainError::DuplicateName(descriptor.name));
        }
        let handle = EffectHandle::new(effect);
        let shared: SharedEffect<B> = handle.shared();
        tracing::debug!(
            "Adding effect '{}' ({}) at priority {}",
            descriptor.name,
            descriptor.kind.label(),
            descriptor.priority
        );
        let entry = ChainEntry {
            descriptor,
            seq: self.next_seq,
            effect: shared,
            initialized: false,
            failure: None,
        };
        self.next_seq += 1;
        self.insert_sorted(entry);
        Ok(handle)
    }

    /// Remove and dispose an effect
    pub fn remove_effect(
        &mut self,
        backend: &mut B,
        name: &str,
    ) -> Result<EffectDescriptor, ChainError> {
        let index = self.index_of(name)?;
        let mut entry = self.entries.remove(index);
        entry.dispose(backend);
        Ok(entry.descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.descriptor.name == name)
    }

    pub fn get(&self, name: &str) -> Option<(&EffectDescriptor, SharedEffect<B>)> {
        self.entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| (&e.descriptor, Rc::clone(&e.effect)))
    }

    pub fn descriptor(&self, name: &str) -> Option<&EffectDescriptor> {
        self.entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| &e.descriptor)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ChainError> {
        let index = self.index_of(name)?;
        self.entries[index].descriptor.enabled = enabled;
        Ok(())
    }

    /// Move an effect to a new priority; insertion order still breaks ties
    pub fn set_priority(&mut self, name: &str, priority: i32) -> Result<(), ChainError> {
        let index = self.index_of(name)?;
        if self.entries[index].descriptor.priority == priority {
            return Ok(());
        }
        let mut entry = self.entries.remove(index);
        entry.descriptor.priority = priority;
        self.insert_sorted(entry);
        Ok(())
    }

    /// Renumber the named effects so equal priorities run in the order given.
    ///
    /// Effects not named keep their earlier position among ties. Unknown names are ignored.
    pub fn resequence<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.descriptor.name == name) {
                entry.seq = self.next_seq;
                self.next_seq += 1;
            }
        }
        self.entries.sort_by_key(|e| e.order_key());
    }

    /// All effect names in execution order, disabled ones included
    pub fn order(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.descriptor.name.as_str())
            .collect()
    }

    /// Names of the effects that will run
    pub fn enabled_order(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.enabled)
            .map(|e| e.descriptor.name.as_str())
            .collect()
    }

    /// Reason the effect was skipped on its latest execution
    pub fn failure(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .and_then(|e| e.failure.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispose every effect; they re-initialize on their next execution
    pub fn dispose_all(&mut self, backend: &mut B) {
        for entry in &mut self.entries {
            entry.dispose(backend);
        }
    }

    /// Run all enabled effects from `frame.scene` into `output`.
    ///
    /// Only errors from the fallback copy are returned; effect failures are
    /// logged and skipped.
    pub fn execute(
        &mut self,
        backend: &mut B,
        frame: &FrameContext<'_, B>,
        scratch: &ScratchPair<B::Texture>,
        output: Target<'_, B::Texture>,
    ) -> Result<(), BackendError> {
        let active: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.descriptor.enabled)
            .map(|(i, _)| i)
            .collect();

        let mut current = Source::Scene;
        for (position, &index) in active.iter().enumerate() {
            let input = match current {
                Source::Scene => frame.scene,
                Source::Scratch(slot) => scratch.get(slot),
            };
            let is_last = position + 1 == active.len();
            let (target, next) = if is_last {
                (output, current)
            } else {
                let slot = current.write_slot();
                (Target::Texture(scratch.get(slot)), Source::Scratch(slot))
            };

            let entry = &mut self.entries[index];
            let status = entry.run(backend, frame, input, target);
            entry.record(&status);
            if status.is_applied() {
                if is_last {
                    return Ok(());
                }
                current = next;
            }
        }

        let input = match current {
            Source::Scene => frame.scene,
            Source::Scratch(slot) => scratch.get(slot),
        };
        backend.draw(&Pass::Blit, &[input], output, &DrawOptions::nearest())
    }

    fn index_of(&self, name: &str) -> Result<usize, ChainError> {
        self.entries
            .iter()
            .position(|e| e.descriptor.name == name)
            .ok_or_else(|| ChainError::UnknownEffect(name.to_string()))
    }

    fn insert_sorted(&mut self, entry: ChainEntry<B>) {
        let key = entry.order_key();
        let index = self.entries.partition_point(|e| e.order_key() < key);
        self.entries.insert(index, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::effects::EffectError;
    use retro_core::{Color, EffectKind, Size};
    use std::cell::RefCell;

    /// Records its name into a shared log, optionally failing
    struct Logged {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        fail: bool,
    }

    impl Effect<SoftwareBackend> for Logged {
        fn initialize(&mut self, _: &mut SoftwareBackend, _: Size) -> Result<(), EffectError> {
            Ok(())
        }

        fn apply(
            &mut self,
            backend: &mut SoftwareBackend,
            _frame: &FrameContext<'_, SoftwareBackend>,
            input: &crate::SoftwareTexture,
            output: Target<'_, crate::SoftwareTexture>,
        ) -> ApplyStatus {
            self.log.borrow_mut().push(self.name);
            if self.fail {
                return ApplyStatus::Skipped("forced failure".to_string());
            }
            backend
                .draw(&Pass::Blit, &[input], output, &DrawOptions::nearest())
                .into()
        }
    }

    fn logged(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str, fail: bool) -> Logged {
        Logged {
            name,
            log: Rc::clone(log),
            fail,
        }
    }

    fn custom(name: &str, priority: i32) -> EffectDescriptor {
        EffectDescriptor::new(name, EffectKind::Custom, priority)
    }

    struct Fixture {
        backend: SoftwareBackend,
        scene: crate::SoftwareTexture,
        scratch: ScratchPair<crate::SoftwareTexture>,
        output: crate::SoftwareTexture,
    }

    fn fixture() -> Fixture {
        let size = Size::new(4, 4);
        let mut backend = SoftwareBackend::new(size);
        let scene = backend.create_target("scene", size).unwrap();
        backend
            .clear(Target::Texture(&scene), Color::rgb(1.0, 0.0, 0.0))
            .unwrap();
        let scratch = ScratchPair::new(
            backend.create_target("a", size).unwrap(),
            backend.create_target("b", size).unwrap(),
        );
        let output = backend.create_target("out", size).unwrap();
        Fixture {
            backend,
            scene,
            scratch,
            output,
        }
    }

    fn execute(chain: &mut EffectChain<SoftwareBackend>, f: &mut Fixture) {
        let frame = FrameContext {
            scene: &f.scene,
            render_size: Size::new(4, 4),
        };
        chain
            .execute(&mut f.backend, &frame, &f.scratch, Target::Texture(&f.output))
            .unwrap();
    }

    #[test]
    fn priority_order_with_stable_ties() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = EffectChain::new();
        chain.add_effect(custom("c", 20), logged(&log, "c", false)).unwrap();
        chain.add_effect(custom("a", 10), logged(&log, "a", false)).unwrap();
        chain.add_effect(custom("b", 10), logged(&log, "b", false)).unwrap();
        assert_eq!(chain.order(), vec!["a", "b", "c"]);

        let mut f = fixture();
        execute(&mut chain, &mut f);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn reprioritized_effect_keeps_insertion_tie_break() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = EffectChain::new();
        chain.add_effect(custom("a", 10), logged(&log, "a", false)).unwrap();
        chain.add_effect(custom("b", 20), logged(&log, "b", false)).unwrap();
        chain.set_priority("b", 10).unwrap();
        assert_eq!(chain.order(), vec!["a", "b"]);
        chain.set_priority("a", 30).unwrap();
        assert_eq!(chain.order(), vec!["b", "a"]);
    }

    #[test]
    fn resequence_reorders_ties_only() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = EffectChain::new();
        chain.add_effect(custom("x", 5), logged(&log, "x", false)).unwrap();
        chain.add_effect(custom("a", 10), logged(&log, "a", false)).unwrap();
        chain.add_effect(custom("b", 10), logged(&log, "b", false)).unwrap();
        chain.add_effect(custom("c", 1), logged(&log, "c", false)).unwrap();
        chain.resequence(["b", "missing", "a", "c"]);
        assert_eq!(chain.order(), vec!["c", "x", "b", "a"]);

        chain.set_priority("a", 20).unwrap();
        chain.set_priority("a", 10).unwrap();
        assert_eq!(chain.order(), vec!["c", "x", "b", "a"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = EffectChain::new();
        chain.add_effect(custom("x", 0), logged(&log, "x", false)).unwrap();
        let err = chain.add_effect(custom("x", 5), logged(&log, "x", false));
        assert!(matches!(err, Err(ChainError::DuplicateName(_))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn total_failure_still_draws_output() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = EffectChain::new();
        chain.add_effect(custom("a", 0), logged(&log, "a", true)).unwrap();
        chain.add_effect(custom("b", 1), logged(&log, "b", true)).unwrap();

        let mut f = fixture();
        execute(&mut chain, &mut f);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert_eq!(f.output.pixel(1, 1), [255, 0, 0, 255]);
        assert_eq!(chain.failure("a"), Some("forced failure"));
    }

    #[test]
    fn disabled_effect_keeps_slot() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = EffectChain::new();
        chain.add_effect(custom("a", 0), logged(&log, "a", false)).unwrap();
        chain.add_effect(custom("b", 1), logged(&log, "b", false)).unwrap();
        chain.add_effect(custom("c", 2), logged(&log, "c", false)).unwrap();
        chain.set_enabled("b", false).unwrap();

        let mut f = fixture();
        execute(&mut chain, &mut f);
        assert_eq!(*log.borrow(), vec!["a", "c"]);

        chain.set_enabled("b", true).unwrap();
        assert_eq!(chain.enabled_order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_chain_copies_scene() {
        let mut chain = EffectChain::new();
        let mut f = fixture();
        execute(&mut chain, &mut f);
        assert_eq!(f.output.pixels(), f.scene.pixels());
    }

    #[test]
    fn scratch_slots_alternate() {
        assert_eq!(Source::Scene.write_slot(), 0);
        assert_eq!(Source::Scratch(0).write_slot(), 1);
        assert_eq!(Source::Scratch(1).write_slot(), 0);
    }

    #[test]
    fn failure_streak_clears_on_success() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = EffectChain::new();
        let handle = chain.add_effect(custom("a", 0), logged(&log, "a", true)).unwrap();

        let mut f = fixture();
        execute(&mut chain, &mut f);
        assert!(chain.failure("a").is_some());
        handle.borrow_mut().fail = false;
        execute(&mut chain, &mut f);
        assert!(chain.failure("a").is_none());
    }

    #[test]
    fn remove_unknown_effect_errors() {
        let mut chain: EffectChain<SoftwareBackend> = EffectChain::new();
        let mut backend = SoftwareBackend::new(Size::new(1, 1));
        assert!(matches!(
            chain.remove_effect(&mut backend, "nope"),
            Err(ChainError::UnknownEffect(_))
        ));
    }
}
