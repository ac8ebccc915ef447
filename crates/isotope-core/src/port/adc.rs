//! Analogue inputs (ADC 0..2)
use std::sync::Arc;

use super::{Capability, Port, PortLink};
use crate::protocol::{Dispatcher, Result, Section};

pub struct AdcInputPort {
    link: PortLink,
}

impl AdcInputPort {
    pub fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            link: PortLink::new(id, dispatcher),
        }
    }

    /// Raw reading, `None` if the board did not answer with one
    pub fn value(&self) -> Result<Option<i64>> {
        tracing::debug!(
            parent: self.link.dispatcher().span(),
            "Reading value from ADC port {}",
            self.link.id()
        );
        self.link.get_int(Section::AnalogInput)
    }
}

impl Port for AdcInputPort {
    const CAPABILITY: Capability = Capability::AdcInput;

    fn id(&self) -> usize {
        self.link.id()
    }
}
