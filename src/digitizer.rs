//! Session object for the DT5742 waveform digitizer.
//!
//! The session drives the native driver through the [`NativeDigitizer`]
//! trait and enforces the acquisition lifecycle: configure while idle, `arm`
//! to allocate buffers and start the hardware, `read_waveforms` while armed,
//! `disarm` to stop and release. Only one armed block may be active at a
//! time; there is no concurrent acquisition.

use std::collections::BTreeMap;
use std::time::Duration;

use bitflags::bitflags;

use crate::error::{CaenError, Result};
use crate::event::{
    self, DecodedEvent, EventRecord, EventWaveforms, WaveChannel, Waveform, INPUTS_PER_GROUP,
};
use crate::native::{BoardInfo, NativeDigitizer};

/// DRS4 sampling frequencies supported by the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drs4Frequency {
    Mhz750,
    Mhz1000,
    Mhz2500,
    Mhz5000,
}

impl Drs4Frequency {
    /// The discrete frequency grid, in MHz.
    pub fn from_mhz(mhz: u32) -> Option<Drs4Frequency> {
        match mhz {
            750 => Some(Drs4Frequency::Mhz750),
            1000 => Some(Drs4Frequency::Mhz1000),
            2500 => Some(Drs4Frequency::Mhz2500),
            5000 => Some(Drs4Frequency::Mhz5000),
            _ => None,
        }
    }

    pub fn mhz(self) -> u32 {
        match self {
            Drs4Frequency::Mhz750 => 750,
            Drs4Frequency::Mhz1000 => 1000,
            Drs4Frequency::Mhz2500 => 2500,
            Drs4Frequency::Mhz5000 => 5000,
        }
    }

    pub fn hertz(self) -> f64 {
        self.mhz() as f64 * 1e6
    }

    /// Vendor code of `CAEN_DGTZ_DRS4Frequency_t` (inverted ordering).
    pub(crate) fn code(self) -> i32 {
        match self {
            Drs4Frequency::Mhz750 => 3,
            Drs4Frequency::Mhz1000 => 2,
            Drs4Frequency::Mhz2500 => 1,
            Drs4Frequency::Mhz5000 => 0,
        }
    }
}

/// How acquisition windows are started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionMode {
    SwControlled,
    SInControlled,
    FirstTrgControlled,
}

impl AcquisitionMode {
    pub(crate) fn code(self) -> i32 {
        match self {
            AcquisitionMode::SwControlled => 0,
            AcquisitionMode::SInControlled => 1,
            AcquisitionMode::FirstTrgControlled => 2,
        }
    }
}

/// Routing of the external trigger (TRIG IN).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    Disabled,
    AcquisitionOnly,
    ExtOutOnly,
    AcquisitionAndExtOut,
}

impl TriggerMode {
    pub(crate) fn code(self) -> i32 {
        match self {
            TriggerMode::Disabled => 0,
            TriggerMode::AcquisitionOnly => 1,
            TriggerMode::ExtOutOnly => 2,
            TriggerMode::AcquisitionAndExtOut => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEdge {
    Rising,
    Falling,
}

impl TriggerEdge {
    pub(crate) fn code(self) -> i32 {
        match self {
            TriggerEdge::Rising => 0,
            TriggerEdge::Falling => 1,
        }
    }
}

bitflags! {
    /// Acquisition Status register (0x8104).
    pub struct AcquisitionStatus: u32 {
        const RUNNING = 1 << 2;
        const EVENT_READY = 1 << 3;
        const EVENT_FULL = 1 << 4;
        // TODO: confirm against the UM4270 register map whether bit 5 set
        // means external or internal clock source; the two decode helpers in
        // the reference code disagree, so do not rely on this label yet.
        const EXTERNAL_CLOCK = 1 << 5;
        const PLL_UNLOCK_DETECT = 1 << 7;
        const BOARD_READY = 1 << 8;
    }
}

const ACQ_STATUS_REGISTER: u16 = 0x8104;
const INPUT_CHANNELS: u8 = 16;
const MAX_EVENTS_PER_TRANSFER: u32 = 1023;
const MAX_POST_TRIGGER_PERCENT: u8 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcqState {
    Idle,
    Armed,
}

/// One open digitizer. Generic over the native driver so the lifecycle and
/// decoding logic can be exercised without the vendor library present.
pub struct Digitizer<L: NativeDigitizer> {
    link: L,
    state: AcqState,
    frequency: Drs4Frequency,
    group_mask: u32,
}

#[cfg(feature = "hardware")]
impl Digitizer<crate::native::CaenDigitizerLink> {
    /// Open the digitizer on the given USB link number.
    pub fn open(link_num: i32) -> Result<Digitizer<crate::native::CaenDigitizerLink>> {
        Ok(Digitizer::new(crate::native::CaenDigitizerLink::open(
            link_num,
        )?))
    }
}

impl<L: NativeDigitizer> Digitizer<L> {
    /// Wrap an already-open native link.
    pub fn new(link: L) -> Digitizer<L> {
        Digitizer {
            link,
            state: AcqState::Idle,
            frequency: Drs4Frequency::Mhz5000,
            group_mask: 0b11,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state == AcqState::Armed
    }

    pub fn reset(&mut self) -> Result<()> {
        self.link.reset()
    }

    pub fn read_register(&mut self, address: u16) -> Result<u32> {
        self.link.read_register(address)
    }

    /// The vendor manual advises the dedicated setters over raw register
    /// writes; this is the escape hatch for the bits they do not cover.
    pub fn write_register(&mut self, address: u16, data: u32) -> Result<()> {
        self.link.write_register(address, data)
    }

    pub fn board_info(&mut self) -> Result<BoardInfo> {
        self.link.board_info()
    }

    /// Identity string in the usual instrument form.
    pub fn idn(&mut self) -> Result<String> {
        let info = self.board_info()?;
        Ok(format!("CAEN {} #{}", info.model_name, info.serial_number))
    }

    /// Read the Acquisition Status register. The register latches some
    /// conditions, so it is read twice with a settling pause, keeping the
    /// second reading.
    pub fn acquisition_status(&mut self) -> Result<AcquisitionStatus> {
        spin_sleep::sleep(Duration::from_millis(300));
        self.link.read_register(ACQ_STATUS_REGISTER)?;
        spin_sleep::sleep(Duration::from_millis(200));
        let raw = self.link.read_register(ACQ_STATUS_REGISTER)?;
        Ok(AcquisitionStatus::from_bits_truncate(raw))
    }

    pub fn set_sampling_frequency(&mut self, frequency: Drs4Frequency) -> Result<()> {
        self.link.set_sampling_frequency(frequency)?;
        self.frequency = frequency;
        Ok(())
    }

    pub fn sampling_frequency(&self) -> Drs4Frequency {
        self.frequency
    }

    /// Number of samples captured per event.
    pub fn set_record_length(&mut self, samples: u32) -> Result<()> {
        self.link.set_record_length(samples)
    }

    /// Max events per block transfer; the hardware accepts 1 to 1023.
    pub fn set_max_events_per_transfer(&mut self, count: u32) -> Result<()> {
        if !(1..=MAX_EVENTS_PER_TRANSFER).contains(&count) {
            return Err(CaenError::Configuration(format!(
                "events per block transfer must be within 1..={}, got {}",
                MAX_EVENTS_PER_TRANSFER, count
            )));
        }
        self.link.set_max_events_per_transfer(count)
    }

    pub fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()> {
        self.link.set_acquisition_mode(mode)
    }

    pub fn set_ext_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
        self.link.set_ext_trigger_mode(mode)
    }

    pub fn set_trigger_polarity(&mut self, channel: u8, edge: TriggerEdge) -> Result<()> {
        self.check_input_channel(channel)?;
        self.link.set_trigger_polarity(channel, edge)
    }

    /// Use TRn as the local trigger.
    pub fn set_fast_trigger_mode(&mut self, enabled: bool) -> Result<()> {
        self.link.set_fast_trigger_mode(enabled)
    }

    /// Include the TRn replica in the data readout.
    pub fn set_fast_trigger_digitizing(&mut self, enabled: bool) -> Result<()> {
        self.link.set_fast_trigger_digitizing(enabled)
    }

    /// TRn threshold in ADC counts.
    pub fn set_fast_trigger_threshold(&mut self, counts: u16) -> Result<()> {
        self.link.set_fast_trigger_threshold(counts)
    }

    /// TRn DC offset in ADC counts.
    pub fn set_fast_trigger_dc_offset(&mut self, counts: u16) -> Result<()> {
        self.link.set_fast_trigger_dc_offset(counts)
    }

    pub fn set_channel_dc_offset(&mut self, channel: u8, counts: u16) -> Result<()> {
        self.check_input_channel(channel)?;
        self.link.set_channel_dc_offset(channel, counts)
    }

    pub fn channel_dc_offset(&mut self, channel: u8) -> Result<u32> {
        self.check_input_channel(channel)?;
        self.link.channel_dc_offset(channel)
    }

    /// Enable or disable the two channel groups (group 0 is CH0..CH7,
    /// group 1 is CH8..CH15). Disabled groups are skipped in readouts.
    pub fn enable_channel_groups(&mut self, group_0: bool, group_1: bool) -> Result<()> {
        let mask = (group_0 as u32) | ((group_1 as u32) << 1);
        self.link.set_group_enable_mask(mask)?;
        self.group_mask = mask;
        Ok(())
    }

    /// Percentage of the acquisition window captured after the trigger:
    /// 0 puts the trigger at the end of the window, 100 at the beginning.
    pub fn set_post_trigger_size(&mut self, percent: u8) -> Result<()> {
        if percent > MAX_POST_TRIGGER_PERCENT {
            return Err(CaenError::Configuration(format!(
                "post-trigger size is a percentage, got {}",
                percent
            )));
        }
        self.link.set_post_trigger_size(percent as u32)
    }

    fn check_input_channel(&self, channel: u8) -> Result<()> {
        if channel >= INPUT_CHANNELS {
            return Err(CaenError::InvalidAddress {
                kind: "digitizer channel",
                value: channel as i64,
                max: (INPUT_CHANNELS - 1) as i64,
            });
        }
        Ok(())
    }

    /// Allocate the event object and readout buffer, load the DRS4
    /// correction tables for the configured sampling frequency, and start
    /// the acquisition. Fails with [`CaenError::AlreadyAcquiring`] if an
    /// acquisition is already active, leaving it untouched.
    ///
    /// If any step fails, everything acquired so far is released again, in
    /// reverse order.
    pub fn arm(&mut self) -> Result<()> {
        if self.state == AcqState::Armed {
            return Err(CaenError::AlreadyAcquiring);
        }
        self.link.allocate_event()?;
        if let Err(err) = self.arm_after_event_allocation() {
            if let Err(free_err) = self.link.free_event() {
                log::warn!("could not free event object while unwinding: {}", free_err);
            }
            return Err(err);
        }
        self.state = AcqState::Armed;
        log::debug!("acquisition started at {} MHz", self.frequency.mhz());
        Ok(())
    }

    fn arm_after_event_allocation(&mut self) -> Result<()> {
        self.link.malloc_readout_buffer()?;
        if let Err(err) = self.start_after_buffer_allocation() {
            if let Err(free_err) = self.link.free_readout_buffer() {
                log::warn!(
                    "could not free readout buffer while unwinding: {}",
                    free_err
                );
            }
            return Err(err);
        }
        Ok(())
    }

    fn start_after_buffer_allocation(&mut self) -> Result<()> {
        self.link.load_drs4_correction(self.frequency)?;
        self.link.set_drs4_correction(true)?;
        self.link.start_acquisition()?;
        Ok(())
    }

    /// Stop the acquisition and release the readout buffer and event object,
    /// in reverse order of acquisition. A disarm with no active acquisition
    /// is a no-op. All release steps are attempted even if an earlier one
    /// fails; the first failure is reported.
    pub fn disarm(&mut self) -> Result<()> {
        if self.state == AcqState::Idle {
            return Ok(());
        }
        let stopped = self.link.stop_acquisition();
        let buffer_freed = self.link.free_readout_buffer();
        let event_freed = self.link.free_event();
        self.state = AcqState::Idle;
        stopped.and(buffer_freed).and(event_freed)
    }

    /// Pull the latest block transfer and decode every event in it into
    /// per-channel waveforms.
    ///
    /// With `emit_time` each waveform carries a time axis derived from the
    /// sampling frequency, shared across the channels of an event. With
    /// `raw_units` samples stay in ADC counts instead of volts (overflow
    /// flagging applies only to the volts view).
    pub fn read_waveforms(&mut self, emit_time: bool, raw_units: bool) -> Result<Vec<EventWaveforms>> {
        if self.state != AcqState::Armed {
            return Err(CaenError::NotAcquiring);
        }
        self.link.read_data()?;
        let count = self.link.num_events()?;
        let mut events = Vec::with_capacity(count as usize);
        for index in 0..count {
            let (record, decoded) = self.link.event(index)?;
            events.push(self.project_event(record, decoded, emit_time, raw_units));
        }
        log::debug!("decoded {} event(s) from block transfer", events.len());
        Ok(events)
    }

    fn project_event(
        &self,
        record: EventRecord,
        decoded: DecodedEvent,
        emit_time: bool,
        raw_units: bool,
    ) -> EventWaveforms {
        let mut channels = BTreeMap::new();
        for (g, group) in decoded.groups.iter().enumerate() {
            if self.group_mask & (1 << g) == 0 {
                continue;
            }
            let group = match group {
                Some(group) => group,
                None => continue,
            };
            for (j, samples) in group.samples.iter().enumerate() {
                if samples.is_empty() {
                    continue;
                }
                let id = if j < INPUTS_PER_GROUP {
                    WaveChannel::Input((g * INPUTS_PER_GROUP + j) as u8)
                } else {
                    WaveChannel::Trigger(g as u8)
                };
                let amplitude = if raw_units {
                    samples.clone()
                } else {
                    samples.iter().copied().map(event::sample_to_volts).collect()
                };
                let time = if emit_time {
                    Some(event::time_axis(samples.len(), self.frequency.hertz()))
                } else {
                    None
                };
                channels.insert(
                    id,
                    Waveform {
                        samples: amplitude,
                        time,
                    },
                );
            }
        }
        EventWaveforms { record, channels }
    }
}

impl<L: NativeDigitizer> Drop for Digitizer<L> {
    fn drop(&mut self) {
        if self.state == AcqState::Armed {
            if let Err(err) = self.disarm() {
                log::warn!("could not stop acquisition on drop: {}", err);
            }
        }
    }
}
