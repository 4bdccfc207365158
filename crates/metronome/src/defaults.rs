//! Process-wide default generator and sampler.
//!
//! Created lazily on first use with default configuration and shared by
//! every caller until destroyed.

use metronome_core::{Generator, ModelSink, Sampler};
use metronome_shared::{GeneratorConfig, NoopPriorityHint, SamplerConfig};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

static GENERATOR: Mutex<Option<Arc<Generator>>> = Mutex::new(None);
static SAMPLER: Mutex<Option<Arc<Sampler>>> = Mutex::new(None);

/// Returns the process-wide generator, starting it on first call.
pub fn create_generator() -> io::Result<Arc<Generator>> {
    let mut slot = GENERATOR.lock();
    if let Some(generator) = slot.as_ref() {
        return Ok(Arc::clone(generator));
    }
    let generator = Generator::new(GeneratorConfig::default(), Arc::new(NoopPriorityHint))?;
    *slot = Some(Arc::clone(&generator));
    Ok(generator)
}

/// Releases the process-wide generator.
///
/// The thread stops once the last outstanding handle is dropped.
pub fn destroy_generator() {
    let released = GENERATOR.lock().take();
    if released.is_some() {
        tracing::info!("default vsync generator released");
    }
}

/// Returns the process-wide sampler, feeding the default generator.
pub fn create_sampler() -> io::Result<Arc<Sampler>> {
    let mut slot = SAMPLER.lock();
    if let Some(sampler) = slot.as_ref() {
        return Ok(Arc::clone(sampler));
    }
    let sink: Arc<dyn ModelSink> = create_generator()?;
    let sampler = Arc::new(Sampler::new(&SamplerConfig::default(), sink));
    *slot = Some(Arc::clone(&sampler));
    Ok(sampler)
}

/// Releases the process-wide sampler.
pub fn destroy_sampler() {
    drop(SAMPLER.lock().take());
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the slots are process-global.
    #[test]
    fn test_default_instances_are_shared() {
        let a = create_generator().unwrap();
        let b = create_generator().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let sampler = create_sampler().unwrap();
        assert!(Arc::ptr_eq(&sampler, &create_sampler().unwrap()));

        // Seeding the sampler reaches the shared generator
        sampler.add_sample(1_000_000);
        sampler.add_sample(17_666_666);
        assert_eq!(a.model().reference_time, 1_000_000);

        destroy_sampler();
        destroy_generator();
        let c = create_generator().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        destroy_generator();
    }
}
