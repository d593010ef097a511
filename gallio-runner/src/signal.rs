// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals in gallio.
//!
//! Test runs are driven from ordinary threads, so signals are awaited on a helper thread that
//! owns a small tokio runtime. Each signal is reported through a callback.

use crate::errors::SignalHandlerSetupError;
use std::{fmt, sync::mpsc, thread::JoinHandle};
use tokio::sync::oneshot;
use tracing::debug;

/// The kind of signal handling to set up for a test run.
///
/// A `SignalHandlerKind` can be passed into
/// [`TestRunnerBuilder::build`](crate::runner::TestRunnerBuilder::build).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// The standard signal handler. Capture interrupt and termination signals depending on the
    /// platform.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn build<F>(self, on_signal: F) -> Result<SignalHandler, SignalHandlerSetupError>
    where
        F: Fn(ShutdownEvent) + Send + 'static,
    {
        match self {
            Self::Standard => SignalHandler::new(on_signal),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// A signal event that should cause a shutdown to happen.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownEvent {
    /// SIGHUP.
    #[cfg(unix)]
    Hangup,
    /// SIGTERM.
    #[cfg(unix)]
    Term,
    /// SIGINT, or Ctrl-C on Windows.
    Interrupt,
}

impl fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Hangup => f.write_str("hangup"),
            #[cfg(unix)]
            Self::Term => f.write_str("term"),
            Self::Interrupt => f.write_str("interrupt"),
        }
    }
}

/// The signal handler implementation.
///
/// Signals stop being handled when this is dropped.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    worker: Option<Worker>,
}

#[derive(Debug)]
struct Worker {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SignalHandler {
    /// Creates a new `SignalHandler` that handles Ctrl-C and other signals.
    fn new<F>(on_signal: F) -> Result<Self, SignalHandlerSetupError>
    where
        F: Fn(ShutdownEvent) + Send + 'static,
    {
        let (stop_sender, stop_receiver) = oneshot::channel();
        let (setup_sender, setup_receiver) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("gallio-signals".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        _ = setup_sender.send(Err(error));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let mut signals = match imp::Signals::new() {
                        Ok(signals) => signals,
                        Err(error) => {
                            _ = setup_sender.send(Err(error));
                            return;
                        }
                    };
                    _ = setup_sender.send(Ok(()));

                    let mut stop_receiver = stop_receiver;
                    loop {
                        tokio::select! {
                            _ = &mut stop_receiver => break,
                            event = signals.recv() => match event {
                                Some(event) => {
                                    debug!("received signal: {event}");
                                    on_signal(event);
                                }
                                None => break,
                            },
                        }
                    }
                });
            })?;

        match setup_receiver.recv() {
            Ok(Ok(())) => Ok(Self {
                worker: Some(Worker {
                    stop: Some(stop_sender),
                    thread: Some(thread),
                }),
            }),
            Ok(Err(error)) => {
                _ = thread.join();
                Err(error.into())
            }
            Err(_) => {
                _ = thread.join();
                Err(std::io::Error::other("signal thread exited during setup").into())
            }
        }
    }

    /// Creates a new `SignalHandler` that does nothing.
    pub(crate) fn noop() -> Self {
        Self { worker: None }
    }

    /// Returns true if signals are being handled.
    pub(crate) fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            _ = thread.join();
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    /// Signals for SIGINT, SIGTERM and SIGHUP on Unix.
    #[derive(Debug)]
    pub(super) struct Signals {
        sigint: SignalWithDone,
        sighup: SignalWithDone,
        sigterm: SignalWithDone,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let sigint = SignalWithDone::new(SignalKind::interrupt())?;
            let sighup = SignalWithDone::new(SignalKind::hangup())?;
            let sigterm = SignalWithDone::new(SignalKind::terminate())?;

            Ok(Self {
                sigint,
                sighup,
                sigterm,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            loop {
                tokio::select! {
                    recv = self.sigint.signal.recv(), if !self.sigint.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Interrupt),
                            None => self.sigint.done = true,
                        }
                    }
                    recv = self.sighup.signal.recv(), if !self.sighup.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Hangup),
                            None => self.sighup.done = true,
                        }
                    }
                    recv = self.sigterm.signal.recv(), if !self.sigterm.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Term),
                            None => self.sigterm.done = true,
                        }
                    }
                    else => {
                        break None
                    }
                }
            }
        }
    }

    #[derive(Debug)]
    struct SignalWithDone {
        signal: Signal,
        done: bool,
    }

    impl SignalWithDone {
        fn new(kind: SignalKind) -> std::io::Result<Self> {
            let signal = signal(kind)?;
            Ok(Self {
                signal,
                done: false,
            })
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
        ctrl_c_done: bool,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let ctrl_c = ctrl_c()?;
            Ok(Self {
                ctrl_c,
                ctrl_c_done: false,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            if self.ctrl_c_done {
                return None;
            }

            match self.ctrl_c.recv().await {
                Some(()) => Some(ShutdownEvent::Interrupt),
                None => {
                    self.ctrl_c_done = true;
                    None
                }
            }
        }
    }
}
