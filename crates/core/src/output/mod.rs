//! Rate-limited output loop, one per playback session.
//!
//! The loop reads the latest analyzed frame, runs it through the filter chain
//! and writes it to the output target at the configured output rate. A write
//! failure is first treated as a transient device condition (for example a
//! suspended system) and recovered by reopening the target once; a second
//! consecutive failure ends the session's output.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    config::rate_period,
    driver::OutputPort,
    frame::FrameSlot,
    observe::{LogLevel, Observer},
    timeline::{format_interval, next_deadline, IntervalStats, StopSignal},
    Result,
};

/// Recovery state of the current write sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteRetry {
    /// The last write succeeded; a failure may be recovered once.
    Armed,
    /// The target was reopened after a failure; another failure is fatal.
    Recovering,
}

/// Handle onto a running output loop.
pub struct OutputScheduler {
    stop: StopSignal,
    finished: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl OutputScheduler {
    /// Spawns the output loop for one playback session.
    pub fn start(port: OutputPort, slot: FrameSlot, observer: Observer) -> Result<Self> {
        let stop = StopSignal::new();
        let (done, finished) = mpsc::channel();
        let mut output = OutputLoop {
            port,
            slot,
            observer,
            stop: stop.clone(),
        };

        let thread = thread::Builder::new()
            .name("atmo-output".to_string())
            .spawn(move || {
                output.run();
                let _ = done.send(());
            })?;

        Ok(Self {
            stop,
            finished,
            thread: Some(thread),
        })
    }

    /// Whether the loop already ended on its own.
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Asks the loop to stop and waits at most `grace` for it. Returns whether
    /// the loop finished in time; if not, it is left to finish on its own.
    pub fn stop(mut self, grace: Duration) -> bool {
        self.stop.request();
        let finished = !matches!(
            self.finished.recv_timeout(grace),
            Err(RecvTimeoutError::Timeout)
        );

        if finished {
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    tracing::error!("output thread panicked");
                }
            }
        }
        finished
    }
}

impl Drop for OutputScheduler {
    fn drop(&mut self) {
        self.stop.request();
    }
}

struct OutputLoop {
    port: OutputPort,
    slot: FrameSlot,
    observer: Observer,
    stop: StopSignal,
}

impl OutputLoop {
    fn run(&mut self) {
        self.observer.log(LogLevel::Info, "output thread running");
        if let Err(err) = self.cycle() {
            self.observer.notify_and_log(LogLevel::Error, err.to_string());
        }
        self.observer.log(LogLevel::Info, "output thread stopped");
    }

    fn cycle(&mut self) -> Result<()> {
        self.port.reset_filters()?;

        let mut rate = self.port.output_rate()?;
        let mut period = rate_period(rate);
        let mut deadline = Instant::now();
        let mut lights_on = false;
        let mut stats = IntervalStats::start();
        let mut retry = WriteRetry::Armed;

        while !self.stop.is_requested() {
            let now = Instant::now();
            if now < deadline {
                self.stop.wait_until(deadline);
                continue;
            }

            let current = self.port.output_rate()?;
            if current != rate {
                rate = current;
                period = rate_period(rate);
                self.observer
                    .log(LogLevel::Debug, format!("output rate changed to {rate} ms"));
            }
            deadline = next_deadline(deadline, period, now);

            let Some(frame) = self.slot.latest()? else {
                continue;
            };
            if !lights_on {
                lights_on = true;
                stats.restart();
            }

            let colors = self.port.filter(&frame)?;
            match self.port.output_colors(&colors) {
                Ok(_) => {
                    retry = WriteRetry::Armed;
                    stats.record();
                }
                Err(err) => match retry {
                    WriteRetry::Armed => {
                        self.observer.log(
                            LogLevel::Info,
                            format!("try to recover after possible system suspend: {err}"),
                        );
                        retry = WriteRetry::Recovering;
                        lights_on = false;
                        if let Err(err) = self.port.reopen() {
                            self.observer.notify(LogLevel::Error, err.to_string());
                            return Ok(());
                        }
                    }
                    WriteRetry::Recovering => {
                        if lights_on {
                            if let Err(off) = self.port.turn_lights_off() {
                                self.observer
                                    .log(LogLevel::Debug, format!("turning lights off: {off}"));
                            }
                        }
                        return Err(err);
                    }
                },
            }
        }

        if lights_on {
            self.port.turn_lights_off()?;
            self.observer.log(
                LogLevel::Info,
                format!("average output interval: {}", format_interval(stats.average())),
            );
        }
        Ok(())
    }
}
