//! Bus supervisor built around the arbitration state machine.
//!
//! Firmware provides a pre-allocated [`BusChannels`] (usually in a
//! `static`), builds a [`DcpBus`] and splits it into:
//!
//! * a [`BusHandle`] to submit outbound frames and read inbound ones;
//! * a [`FrameListener`] to install in the falling-edge interrupt;
//! * a [`BusRunner`] to spawn as the single task owning the line.
//!
//! No allocation is performed by the library and there is no dependency on a
//! particular BSP.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, signal::Signal};
use futures_util::{future::select, future::Either, pin_mut};

use crate::core::FrameBytes;
use crate::error::{InitError, SubmitError, TimingError};
use crate::infra::codec::bits::{exclusive, BitCodec};
use crate::infra::timing::TimingProfile;
use crate::protocol::arbitration::{
    duration_ms, BusConfig, BusMode, BusState, ReadPolicy, QUEUE_DEPTH,
};
use crate::protocol::frame::Frame;
use crate::protocol::transport::{
    receiver::{FrameListener, CAPTURE_DEPTH},
    sender::{send_frame, send_preamble, SendOutcome},
    traits::{bus_line::BusLine, bus_timer::BusTimer, cycle_clock::CycleClock},
    BusIo,
};

//==================================================================================CHANNELS
/// Queues and notifications shared by the listener, the runner and the handles.
pub struct BusChannels {
    captures: Channel<CriticalSectionRawMutex, FrameBytes, CAPTURE_DEPTH>,
    inbound: Channel<CriticalSectionRawMutex, Frame, QUEUE_DEPTH>,
    outbound: Channel<CriticalSectionRawMutex, Frame, QUEUE_DEPTH>,
    activity: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for BusChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl BusChannels {
    pub const fn new() -> Self {
        Self {
            captures: Channel::new(),
            inbound: Channel::new(),
            outbound: Channel::new(),
            activity: Signal::new(),
        }
    }

    /// Flag line activity from an interrupt that is not the frame listener
    /// (e.g. while a diagnostic listener is installed).
    pub fn notify_activity(&self) {
        self.activity.signal(());
    }

    /// Captures waiting for the runner.
    pub fn pending_captures(&self) -> usize {
        self.captures.len()
    }

    /// Decoded frames waiting for the application.
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }
}

//==================================================================================SERVICE
/// Initialized bus, ready to be split.
pub struct DcpBus<'a, L, C, T> {
    channels: &'a BusChannels,
    mode: BusMode,
    config: BusConfig,
    profile: TimingProfile,
    codec: BitCodec,
    runner_io: BusIo<L, C>,
    listener_io: BusIo<L, C>,
    timer: T,
}

impl<'a, L, C, T> DcpBus<'a, L, C, T>
where
    L: BusLine,
    C: CycleClock,
    T: BusTimer,
{
    /// Validate the mode, derive the timing profile and configure the pin.
    ///
    /// `runner_io` and `listener_io` are two handles on the same physical pin:
    /// one for the task, one for the interrupt.
    pub fn new(
        channels: &'a BusChannels,
        mode: BusMode,
        config: BusConfig,
        mut runner_io: BusIo<L, C>,
        listener_io: BusIo<L, C>,
        timer: T,
    ) -> Result<Self, InitError<L::Error>> {
        if mode.address == 0 {
            return Err(InitError::InvalidAddress);
        }

        let profile = TimingProfile::new(mode.speed, runner_io.clock.cpu_mhz()).map_err(
            |err| match err {
                TimingError::ClockTooSlow { cpu_mhz } => InitError::ClockTooSlow { cpu_mhz },
            },
        )?;

        runner_io.line.configure().map_err(InitError::Line)?;
        runner_io.line.release();

        let delays = profile.tx_delays(mode.address, mode.controller, &config.skew);
        let codec = BitCodec::new(profile.window(), delays);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "Bus up: address {}, {}, window {}..{} cycles",
            mode.address,
            mode.speed,
            profile.window().min,
            profile.window().max
        );

        Ok(Self {
            channels,
            mode,
            config,
            profile,
            codec,
            runner_io,
            listener_io,
            timer,
        })
    }

    pub fn profile(&self) -> TimingProfile {
        self.profile
    }

    pub fn mode(&self) -> BusMode {
        self.mode
    }

    /// Split into handle/listener/runner components.
    pub fn into_parts(self) -> BusParts<'a, L, C, T> {
        BusParts {
            handle: BusHandle {
                channels: self.channels,
                read_policy: self.mode.read_policy,
                submit_timeout_ms: self.config.submit_timeout.map(duration_ms),
            },
            listener: FrameListener::new(
                self.listener_io,
                self.codec,
                &self.channels.captures,
                &self.channels.activity,
            ),
            runner: BusRunner {
                io: self.runner_io,
                timer: self.timer,
                channels: self.channels,
                codec: self.codec,
                config: self.config,
                state: BusState::Waiting,
                pending: None,
                capture: None,
            },
        }
    }
}

/// Bundle returned by [`DcpBus::into_parts`].
pub struct BusParts<'a, L, C, T> {
    pub handle: BusHandle<'a>,
    pub listener: FrameListener<'a, L, C>,
    pub runner: BusRunner<'a, L, C, T>,
}

//==================================================================================HANDLE
/// Application side of the bus. Cheap to copy into several tasks.
#[derive(Clone, Copy)]
pub struct BusHandle<'a> {
    channels: &'a BusChannels,
    read_policy: ReadPolicy,
    submit_timeout_ms: Option<u32>,
}

impl<'a> BusHandle<'a> {
    /// Queue a frame, waiting at most the configured submit timeout.
    pub async fn submit<T: BusTimer>(&self, frame: Frame, timer: &mut T) -> Result<(), SubmitError> {
        let Some(timeout_ms) = self.submit_timeout_ms else {
            self.channels.outbound.send(frame).await;
            return Ok(());
        };

        let send = self.channels.outbound.send(frame);
        let delay = timer.delay_ms(timeout_ms);
        pin_mut!(send);
        pin_mut!(delay);

        match select(send, delay).await {
            Either::Left(_) => Ok(()),
            Either::Right(_) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("Outbound queue still full after {} ms", timeout_ms);
                Err(SubmitError::QueueTimeout)
            }
        }
    }

    /// Queue a frame without waiting.
    pub fn try_submit(&self, frame: Frame) -> Result<(), SubmitError> {
        self.channels
            .outbound
            .try_send(frame)
            .map_err(|_| SubmitError::QueueFull)
    }

    /// Next inbound frame according to the read policy.
    pub async fn read(&self) -> Option<Frame> {
        match self.read_policy {
            ReadPolicy::Instant => self.channels.inbound.try_receive().ok(),
            ReadPolicy::Asynchronous => Some(self.channels.inbound.receive().await),
        }
    }
}

//==================================================================================RUNNER
/// Runner that owns the line and drives the arbitration loop.
pub struct BusRunner<'a, L, C, T> {
    io: BusIo<L, C>,
    timer: T,
    channels: &'a BusChannels,
    codec: BitCodec,
    config: BusConfig,
    state: BusState,
    /// Serialized outbound frame, kept across collisions until sent.
    pending: Option<FrameBytes>,
    capture: Option<FrameBytes>,
}

impl<'a, L, C, T> BusRunner<'a, L, C, T>
where
    L: BusLine,
    C: CycleClock,
    T: BusTimer,
{
    pub fn state(&self) -> BusState {
        self.state
    }

    /// Whether an outbound frame is waiting to be (re)sent.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Run forever.
    pub async fn drive(mut self) {
        loop {
            self.step().await;
        }
    }

    /// Execute the current state once and return the next one.
    pub async fn step(&mut self) -> BusState {
        let next = match self.state {
            BusState::Waiting => self.wait().await,
            BusState::Listening => self.listen(),
            BusState::Starting => self.start(),
            BusState::Reading => self.read().await,
            BusState::Sending => {
                // Never stored; see the variant.
                #[cfg(feature = "defmt")]
                defmt::error!("Runner resumed in Sending, back to Waiting");
                BusState::Waiting
            }
        };

        #[cfg(feature = "defmt")]
        defmt::trace!("{} -> {}", self.state, next);

        self.state = next;
        next
    }

    async fn wait(&mut self) -> BusState {
        let channels = self.channels;

        if let Ok(bytes) = channels.captures.try_receive() {
            self.capture = Some(bytes);
            return BusState::Reading;
        }

        if self.pending.is_some() {
            let retry_ms = duration_ms(self.config.retry_poll);
            let polled = {
                let capture = channels.captures.receive();
                let delay = self.timer.delay_ms(retry_ms);
                pin_mut!(capture);
                pin_mut!(delay);
                match select(capture, delay).await {
                    Either::Left((bytes, _)) => Some(bytes),
                    Either::Right(_) => None,
                }
            };
            return match polled {
                Some(bytes) => {
                    self.capture = Some(bytes);
                    BusState::Reading
                }
                None => BusState::Listening,
            };
        }

        if let Ok(frame) = channels.outbound.try_receive() {
            self.pending = Some(frame.to_bytes());
            return BusState::Listening;
        }

        let woke = {
            let capture = channels.captures.receive();
            let outbound = channels.outbound.receive();
            pin_mut!(capture);
            pin_mut!(outbound);
            match select(capture, outbound).await {
                Either::Left((bytes, _)) => Either::Left(bytes),
                Either::Right((frame, _)) => Either::Right(frame),
            }
        };

        match woke {
            Either::Left(bytes) => {
                self.capture = Some(bytes);
                BusState::Reading
            }
            Either::Right(frame) => {
                self.pending = Some(frame.to_bytes());
                BusState::Listening
            }
        }
    }

    fn listen(&mut self) -> BusState {
        if self.io.line.is_low() {
            return BusState::Waiting;
        }

        self.channels.activity.reset();
        let backoff = self.codec.delays().backoff;
        let io = &mut self.io;
        exclusive(|| io.clock.delay_cycles(backoff));

        if self.channels.activity.try_take().is_some() {
            #[cfg(feature = "defmt")]
            defmt::debug!("Activity during backoff, yielding");
            BusState::Waiting
        } else {
            BusState::Starting
        }
    }

    fn start(&mut self) -> BusState {
        let Some(bytes) = self.pending else {
            #[cfg(feature = "defmt")]
            defmt::error!("Starting without a pending frame");
            return BusState::Waiting;
        };

        let codec = self.codec;
        let io = &mut self.io;
        let outcome = exclusive(|| {
            if io.line.is_low() {
                return None;
            }
            send_preamble(io, &codec.delays());
            Some(send_frame(io, &codec, bytes.as_slice()))
        });

        match outcome {
            None => BusState::Waiting,
            Some(SendOutcome::Collision { bit: _bit }) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("Collision at bit {}, frame kept for retry", _bit);
                BusState::Listening
            }
            Some(SendOutcome::Sent) => {
                self.pending = None;
                self.channels.activity.reset();
                self.io.line.release();
                BusState::Waiting
            }
        }
    }

    async fn read(&mut self) -> BusState {
        let Some(bytes) = self.capture.take() else {
            return BusState::Waiting;
        };

        // A one-byte capture (tag 1) has no address and is not a frame.
        let frame = match Frame::from_bytes(bytes.as_slice()) {
            Ok(frame) => frame,
            Err(_err) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("Dropping undecodable capture: {}", _err);
                return BusState::Waiting;
            }
        };

        let inbound_ms = duration_ms(self.config.inbound_timeout);
        let channels = self.channels;
        let send = channels.inbound.send(frame);
        let delay = self.timer.delay_ms(inbound_ms);
        pin_mut!(send);
        pin_mut!(delay);

        if let Either::Right(_) = select(send, delay).await {
            #[cfg(feature = "defmt")]
            defmt::warn!("Inbound queue full, frame dropped");
        }

        BusState::Waiting
    }
}
