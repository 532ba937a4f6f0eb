//! Windowed accumulation of signed power samples into directional energy
//! sums. A channel splits one bidirectional power reading into separate
//! "out" and "in" running sums; the sums reset on every flush, the
//! channels live for the process lifetime.

/// Running sum for one flow direction.
#[derive(Debug)]
pub struct EflowAggregate {
    pub name: &'static str,
    sum: f64,
}

impl EflowAggregate {
    pub fn new(name: &'static str) -> Self {
        Self { name, sum: 0.0 }
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
    }

    fn take(&mut self) -> f64 {
        std::mem::replace(&mut self.sum, 0.0)
    }
}

/// Routes signed power samples of one source item into its aggregates.
///
/// Channels without an "in" side never accumulate inbound energy.
#[derive(Debug)]
pub struct EflowChannel {
    pub source_name: &'static str,
    out: EflowAggregate,
    input: Option<EflowAggregate>,
}

impl EflowChannel {
    pub fn new(
        source_name: &'static str,
        out: EflowAggregate,
        input: Option<EflowAggregate>,
    ) -> Self {
        Self { source_name, out, input }
    }

    /// Accumulate one sample: positive magnitude goes out, negative goes in
    /// (dropped when no "in" aggregate is configured). `None` is a no-op.
    pub fn push(&mut self, value: Option<f64>) {
        let Some(value) = value else { return };
        if value > 0.0 {
            self.out.add(value.abs());
        } else if let Some(input) = self.input.as_mut() {
            input.add(value.abs());
        }
    }

    /// Return the present aggregate sums and reset them to zero.
    pub fn drain_and_reset(&mut self) -> Vec<(&'static str, f64)> {
        let mut drained = vec![(self.out.name, self.out.take())];
        if let Some(input) = self.input.as_mut() {
            drained.push((input.name, input.take()));
        }
        drained
    }
}
