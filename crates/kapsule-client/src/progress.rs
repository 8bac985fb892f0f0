use kapsule_core::ProgressMessage;

/// Receives progress messages for one tracked operation.
///
/// The sink is supplied by the caller per operation rather than being a
/// process-wide output object; presentation (colors, indentation) is entirely
/// the caller's concern. Messages arrive synchronously in emission order.
pub trait ProgressSink {
    fn message(&mut self, message: &ProgressMessage);
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressMessage),
{
    fn message(&mut self, message: &ProgressMessage) {
        self(message)
    }
}
