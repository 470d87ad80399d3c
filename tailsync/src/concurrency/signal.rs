use tokio::sync::watch;

/// Sending half of a one shot boolean signal.
pub type SignalTx = watch::Sender<bool>;

/// Receiving half of a one shot boolean signal.
pub type SignalRx = watch::Receiver<bool>;

/// Creates a new pair of [`SignalTx`] and [`SignalRx`], initially unset.
pub fn create_signal() -> (SignalTx, SignalRx) {
    watch::channel(false)
}
