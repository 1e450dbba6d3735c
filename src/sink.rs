use crate::messages::{InstanceId, PhysicalSample};

/// Downstream consumer of converted samples.
///
/// `deliver` is called from inside a poll cycle: it must not block and must
/// never touch the bus.
pub trait SampleSink: Send + Sync {
    fn deliver(&self, instance: InstanceId, sample: PhysicalSample);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every delivery in order
    #[derive(Default)]
    pub struct CollectingSink {
        delivered: Mutex<Vec<(InstanceId, PhysicalSample)>>,
    }

    impl CollectingSink {
        pub fn samples(&self) -> Vec<(InstanceId, PhysicalSample)> {
            self.delivered.lock().unwrap().clone()
        }

        pub fn vectors(&self) -> Vec<[f32; 3]> {
            self.samples().into_iter().map(|(_, s)| s.vector).collect()
        }
    }

    impl SampleSink for CollectingSink {
        fn deliver(&self, instance: InstanceId, sample: PhysicalSample) {
            self.delivered.lock().unwrap().push((instance, sample));
        }
    }
}
