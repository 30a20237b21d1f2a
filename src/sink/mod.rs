use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

/// Downstream consumer of decoded values. Publication is fire-and-forget.
pub trait MeasurementSink {
    fn publish(&self, value: f32);
}

/// Keeps only the latest value; a waiting consumer is woken.
impl<M: RawMutex> MeasurementSink for Signal<M, f32> {
    fn publish(&self, value: f32) {
        self.signal(value);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F: Fn(f32)> MeasurementSink for FnSink<F> {
    fn publish(&self, value: f32) {
        (self.0)(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub label: &'static str,
    pub value: f32,
}

/// Forwards labelled readings into a bounded queue shared by several channels.
/// Readings are dropped when the queue is full.
pub struct QueueSink<'q, M: RawMutex, const N: usize> {
    label: &'static str,
    queue: &'q Channel<M, Reading, N>,
}

impl<'q, M: RawMutex, const N: usize> QueueSink<'q, M, N> {
    pub const fn new(label: &'static str, queue: &'q Channel<M, Reading, N>) -> Self {
        Self { label, queue }
    }
}

impl<'q, M: RawMutex, const N: usize> MeasurementSink for QueueSink<'q, M, N> {
    fn publish(&self, value: f32) {
        let reading = Reading { label: self.label, value };

        if self.queue.try_send(reading).is_err() {
            warn!("sink: queue full, dropped reading for {=str}", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::*;

    #[test]
    fn signal_keeps_latest_value() {
        let signal = Signal::<NoopRawMutex, f32>::new();

        signal.publish(1.0);
        signal.publish(2.5);

        assert_eq!(signal.try_take(), Some(2.5));
        assert_eq!(signal.try_take(), None);
    }

    #[test]
    fn queue_sink_labels_and_drops_when_full() {
        let queue = Channel::<NoopRawMutex, Reading, 2>::new();
        let sink = QueueSink::new("soil moisture", &queue);

        sink.publish(10.0);
        sink.publish(20.0);
        sink.publish(30.0);

        assert_eq!(queue.try_receive().ok(), Some(Reading { label: "soil moisture", value: 10.0 }));
        assert_eq!(queue.try_receive().ok(), Some(Reading { label: "soil moisture", value: 20.0 }));
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn closure_sink_receives_values() {
        let last = Cell::new(0.0f32);
        let sink = FnSink(|v| last.set(v));

        sink.publish(42.0);

        assert_eq!(last.get(), 42.0);
    }
}
