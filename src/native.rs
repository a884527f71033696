//! Native call surface of the vendor's libCAENDigitizer driver.
//!
//! The library is consumed as an opaque collaborator: every call returns a
//! status code (zero is success, nonzero an opaque vendor error surfaced
//! verbatim). The [`NativeDigitizer`] trait mirrors that surface so the
//! session logic can run against the real driver, linked in with the
//! `hardware` feature, or against a scripted stand-in in tests.

use num_derive::FromPrimitive;

use crate::digitizer::{AcquisitionMode, Drs4Frequency, TriggerEdge, TriggerMode};
use crate::error::{CaenError, Result};
use crate::event::{DecodedEvent, EventRecord};

/// Status codes of libCAENDigitizer (vendor header `CAENDigitizerType.h`).
/// Kept only to make log output readable; the raw code travels in
/// [`CaenError::Native`] untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(i32)]
pub enum NativeStatus {
    Success = 0,
    CommError = -1,
    GenericError = -2,
    InvalidParam = -3,
    InvalidLinkType = -4,
    InvalidHandle = -5,
    MaxDevicesError = -6,
    BadBoardType = -7,
    BadInterruptLev = -8,
    BadEventNumber = -9,
    ReadDeviceRegisterFail = -10,
    WriteDeviceRegisterFail = -11,
    InvalidChannelNumber = -13,
    ChannelBusy = -14,
    FPIOModeInvalid = -15,
    WrongAcqMode = -16,
    FunctionNotAllowed = -17,
    Timeout = -18,
    InvalidBuffer = -19,
    EventNotFound = -20,
    InvalidEvent = -21,
    OutOfMemory = -22,
    CalibrationError = -23,
    DigitizerNotFound = -24,
    DigitizerAlreadyOpen = -25,
    DigitizerNotReady = -26,
    InterruptNotConfigured = -27,
    DigitizerMemoryCorrupted = -28,
    DPPFirmwareNotSupported = -29,
    InvalidLicense = -30,
    InvalidDigitizerStatus = -31,
    UnsupportedTrace = -32,
    InvalidProbe = -33,
    UnsupportedBaseAddress = -34,
    NotYetImplemented = -99,
}

/// Translate a native status code into a `Result`.
pub fn check(code: i32) -> Result<()> {
    use num_traits::FromPrimitive;
    if code == 0 {
        Ok(())
    } else {
        match NativeStatus::from_i32(code) {
            Some(status) => log::warn!("libCAENDigitizer returned {} ({:?})", code, status),
            None => log::warn!("libCAENDigitizer returned unknown code {}", code),
        }
        Err(CaenError::Native(code))
    }
}

/// Board identity and capabilities, mirrored field-for-field from the
/// vendor's `CAEN_DGTZ_BoardInfo_t`.
#[derive(Clone, Debug, Default)]
pub struct BoardInfo {
    pub model_name: String,
    pub model: u32,
    pub channels: u32,
    pub form_factor: u32,
    pub family_code: u32,
    pub roc_firmware: String,
    pub amc_firmware: String,
    pub serial_number: u32,
    pub pcb_revision: u32,
    pub adc_bits: u32,
}

/// The native driver operations the digitizer session relies on.
///
/// Implementations own the native handle plus all native-allocated buffers
/// (event object, readout buffer) and must release whatever is still held,
/// in reverse order of acquisition, when dropped; the handle itself must be
/// released exactly once.
pub trait NativeDigitizer {
    fn reset(&mut self) -> Result<()>;
    fn read_register(&mut self, address: u16) -> Result<u32>;
    fn write_register(&mut self, address: u16, data: u32) -> Result<()>;
    fn board_info(&mut self) -> Result<BoardInfo>;

    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()>;
    fn set_record_length(&mut self, samples: u32) -> Result<()>;
    fn set_max_events_per_transfer(&mut self, count: u32) -> Result<()>;
    fn set_ext_trigger_mode(&mut self, mode: TriggerMode) -> Result<()>;
    fn set_trigger_polarity(&mut self, channel: u8, edge: TriggerEdge) -> Result<()>;
    fn set_fast_trigger_mode(&mut self, enabled: bool) -> Result<()>;
    fn set_fast_trigger_digitizing(&mut self, enabled: bool) -> Result<()>;
    fn set_fast_trigger_threshold(&mut self, counts: u16) -> Result<()>;
    fn set_fast_trigger_dc_offset(&mut self, counts: u16) -> Result<()>;
    fn set_channel_dc_offset(&mut self, channel: u8, counts: u16) -> Result<()>;
    fn channel_dc_offset(&mut self, channel: u8) -> Result<u32>;
    fn set_group_enable_mask(&mut self, mask: u32) -> Result<()>;
    fn set_post_trigger_size(&mut self, percent: u32) -> Result<()>;
    fn set_sampling_frequency(&mut self, frequency: Drs4Frequency) -> Result<()>;
    fn load_drs4_correction(&mut self, frequency: Drs4Frequency) -> Result<()>;
    fn set_drs4_correction(&mut self, enabled: bool) -> Result<()>;

    fn allocate_event(&mut self) -> Result<()>;
    fn malloc_readout_buffer(&mut self) -> Result<()>;
    fn free_event(&mut self) -> Result<()>;
    fn free_readout_buffer(&mut self) -> Result<()>;
    fn start_acquisition(&mut self) -> Result<()>;
    fn stop_acquisition(&mut self) -> Result<()>;

    /// Pull the latest block transfer from the hardware into the readout
    /// buffer.
    fn read_data(&mut self) -> Result<()>;
    /// Number of events contained in the last block transfer.
    fn num_events(&mut self) -> Result<u32>;
    /// Metadata and decoded sample arrays of the `index`-th event of the
    /// last block transfer.
    fn event(&mut self, index: u32) -> Result<(EventRecord, DecodedEvent)>;
}

#[cfg(feature = "hardware")]
pub use self::ffi::CaenDigitizerLink;

#[cfg(feature = "hardware")]
mod ffi {
    use std::os::raw::{c_char, c_int, c_void};
    use std::ptr;

    use super::{check, BoardInfo, NativeDigitizer};
    use crate::digitizer::{AcquisitionMode, Drs4Frequency, TriggerEdge, TriggerMode};
    use crate::error::Result;
    use crate::event::{
        DecodedEvent, EventRecord, GroupData, CHANNELS_PER_GROUP, GROUPS_PER_EVENT,
    };

    // USB link, directly attached (no CONET node, no VME bridge).
    const LINK_TYPE_USB: c_int = 0;

    #[repr(C)]
    struct RawGroup {
        ch_size: [u32; CHANNELS_PER_GROUP],
        data_channel: [*mut f32; CHANNELS_PER_GROUP],
        trigger_time_lag: u32,
        start_index_cell: u16,
    }

    #[repr(C)]
    struct RawEvent {
        gr_present: [u8; GROUPS_PER_EVENT],
        data_group: [RawGroup; GROUPS_PER_EVENT],
    }

    #[repr(C)]
    #[derive(Default)]
    struct RawEventInfo {
        event_size: u32,
        board_id: u32,
        pattern: u32,
        channel_mask: u32,
        event_counter: u32,
        trigger_time_tag: u32,
    }

    #[repr(C)]
    struct RawBoardInfo {
        model_name: [c_char; 12],
        model: u32,
        channels: u32,
        form_factor: u32,
        family_code: u32,
        roc_firmware_rel: [c_char; 20],
        amc_firmware_rel: [c_char; 40],
        serial_number: u32,
        mezzanine_ser_num: [[c_char; 8]; 4],
        pcb_revision: u32,
        adc_nbits: u32,
        sam_correction_data_loaded: u32,
        comm_handle: c_int,
        vme_handle: c_int,
        license: [c_char; 999],
    }

    #[link(name = "CAENDigitizer")]
    extern "C" {
        fn CAEN_DGTZ_OpenDigitizer(
            link_type: c_int,
            link_num: c_int,
            conet_node: c_int,
            vme_base_address: u32,
            handle: *mut c_int,
        ) -> c_int;
        fn CAEN_DGTZ_CloseDigitizer(handle: c_int) -> c_int;
        fn CAEN_DGTZ_Reset(handle: c_int) -> c_int;
        fn CAEN_DGTZ_ReadRegister(handle: c_int, address: u32, data: *mut u32) -> c_int;
        fn CAEN_DGTZ_WriteRegister(handle: c_int, address: u32, data: u32) -> c_int;
        fn CAEN_DGTZ_GetInfo(handle: c_int, info: *mut RawBoardInfo) -> c_int;
        fn CAEN_DGTZ_SetAcquisitionMode(handle: c_int, mode: c_int) -> c_int;
        fn CAEN_DGTZ_SetRecordLength(handle: c_int, samples: u32) -> c_int;
        fn CAEN_DGTZ_SetMaxNumEventsBLT(handle: c_int, count: u32) -> c_int;
        fn CAEN_DGTZ_SetExtTriggerInputMode(handle: c_int, mode: c_int) -> c_int;
        fn CAEN_DGTZ_SetTriggerPolarity(handle: c_int, channel: u32, polarity: c_int) -> c_int;
        fn CAEN_DGTZ_SetFastTriggerMode(handle: c_int, mode: c_int) -> c_int;
        fn CAEN_DGTZ_SetFastTriggerDigitizing(handle: c_int, enable: c_int) -> c_int;
        fn CAEN_DGTZ_SetGroupFastTriggerThreshold(
            handle: c_int,
            group: u32,
            threshold: u32,
        ) -> c_int;
        fn CAEN_DGTZ_SetGroupFastTriggerDCOffset(handle: c_int, group: u32, offset: u32) -> c_int;
        fn CAEN_DGTZ_SetChannelDCOffset(handle: c_int, channel: u32, offset: u32) -> c_int;
        fn CAEN_DGTZ_GetChannelDCOffset(handle: c_int, channel: u32, offset: *mut u32) -> c_int;
        fn CAEN_DGTZ_SetGroupEnableMask(handle: c_int, mask: u32) -> c_int;
        fn CAEN_DGTZ_SetPostTriggerSize(handle: c_int, percent: u32) -> c_int;
        fn CAEN_DGTZ_SetDRS4SamplingFrequency(handle: c_int, frequency: c_int) -> c_int;
        fn CAEN_DGTZ_LoadDRS4CorrectionData(handle: c_int, frequency: c_int) -> c_int;
        fn CAEN_DGTZ_EnableDRS4Correction(handle: c_int) -> c_int;
        fn CAEN_DGTZ_DisableDRS4Correction(handle: c_int) -> c_int;
        fn CAEN_DGTZ_AllocateEvent(handle: c_int, event: *mut *mut c_void) -> c_int;
        fn CAEN_DGTZ_MallocReadoutBuffer(
            handle: c_int,
            buffer: *mut *mut c_char,
            size: *mut u32,
        ) -> c_int;
        fn CAEN_DGTZ_FreeEvent(handle: c_int, event: *mut *mut c_void) -> c_int;
        fn CAEN_DGTZ_FreeReadoutBuffer(buffer: *mut *mut c_char) -> c_int;
        fn CAEN_DGTZ_SWStartAcquisition(handle: c_int) -> c_int;
        fn CAEN_DGTZ_SWStopAcquisition(handle: c_int) -> c_int;
        fn CAEN_DGTZ_ReadData(
            handle: c_int,
            mode: c_int,
            buffer: *mut c_char,
            size: *mut u32,
        ) -> c_int;
        fn CAEN_DGTZ_GetNumEvents(
            handle: c_int,
            buffer: *mut c_char,
            size: u32,
            count: *mut u32,
        ) -> c_int;
        fn CAEN_DGTZ_GetEventInfo(
            handle: c_int,
            buffer: *mut c_char,
            size: u32,
            index: u32,
            info: *mut RawEventInfo,
            event_ptr: *mut *mut c_char,
        ) -> c_int;
        fn CAEN_DGTZ_DecodeEvent(
            handle: c_int,
            event_ptr: *mut c_char,
            event: *mut *mut c_void,
        ) -> c_int;
    }

    // Block-transfer readout mode (slave-terminated MBLT in the vendor enum).
    const READ_MODE_SLAVE_TERMINATED_MBLT: c_int = 0;

    fn c_text(chars: &[c_char]) -> String {
        chars
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8 as char)
            .collect()
    }

    /// Owned connection to one digitizer over the vendor driver. Holds the
    /// native handle plus whatever the driver has allocated on our behalf;
    /// everything still held is released, buffers first, on drop.
    pub struct CaenDigitizerLink {
        handle: c_int,
        event: *mut RawEvent,
        buffer: *mut c_char,
        buffer_allocated: u32,
        buffer_filled: u32,
    }

    // The raw pointers are owned exclusively by this struct.
    unsafe impl Send for CaenDigitizerLink {}

    impl CaenDigitizerLink {
        /// Open the USB link with the given vendor link number.
        pub fn open(link_num: i32) -> Result<CaenDigitizerLink> {
            let mut handle: c_int = 0;
            check(unsafe {
                CAEN_DGTZ_OpenDigitizer(LINK_TYPE_USB, link_num, 0, 0, &mut handle)
            })?;
            log::debug!("opened digitizer link {} (handle {})", link_num, handle);
            Ok(CaenDigitizerLink {
                handle,
                event: ptr::null_mut(),
                buffer: ptr::null_mut(),
                buffer_allocated: 0,
                buffer_filled: 0,
            })
        }
    }

    impl NativeDigitizer for CaenDigitizerLink {
        fn reset(&mut self) -> Result<()> {
            check(unsafe { CAEN_DGTZ_Reset(self.handle) })
        }

        fn read_register(&mut self, address: u16) -> Result<u32> {
            let mut data: u32 = 0;
            check(unsafe { CAEN_DGTZ_ReadRegister(self.handle, address as u32, &mut data) })?;
            Ok(data)
        }

        fn write_register(&mut self, address: u16, data: u32) -> Result<()> {
            check(unsafe { CAEN_DGTZ_WriteRegister(self.handle, address as u32, data) })
        }

        fn board_info(&mut self) -> Result<BoardInfo> {
            let mut raw: RawBoardInfo = unsafe { std::mem::zeroed() };
            check(unsafe { CAEN_DGTZ_GetInfo(self.handle, &mut raw) })?;
            Ok(BoardInfo {
                model_name: c_text(&raw.model_name),
                model: raw.model,
                channels: raw.channels,
                form_factor: raw.form_factor,
                family_code: raw.family_code,
                roc_firmware: c_text(&raw.roc_firmware_rel),
                amc_firmware: c_text(&raw.amc_firmware_rel),
                serial_number: raw.serial_number,
                pcb_revision: raw.pcb_revision,
                adc_bits: raw.adc_nbits,
            })
        }

        fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetAcquisitionMode(self.handle, mode.code()) })
        }

        fn set_record_length(&mut self, samples: u32) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetRecordLength(self.handle, samples) })
        }

        fn set_max_events_per_transfer(&mut self, count: u32) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetMaxNumEventsBLT(self.handle, count) })
        }

        fn set_ext_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetExtTriggerInputMode(self.handle, mode.code()) })
        }

        fn set_trigger_polarity(&mut self, channel: u8, edge: TriggerEdge) -> Result<()> {
            check(unsafe {
                CAEN_DGTZ_SetTriggerPolarity(self.handle, channel as u32, edge.code())
            })
        }

        fn set_fast_trigger_mode(&mut self, enabled: bool) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetFastTriggerMode(self.handle, enabled as c_int) })
        }

        fn set_fast_trigger_digitizing(&mut self, enabled: bool) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetFastTriggerDigitizing(self.handle, enabled as c_int) })
        }

        fn set_fast_trigger_threshold(&mut self, counts: u16) -> Result<()> {
            // group argument is always 0 on this board
            check(unsafe {
                CAEN_DGTZ_SetGroupFastTriggerThreshold(self.handle, 0, counts as u32)
            })
        }

        fn set_fast_trigger_dc_offset(&mut self, counts: u16) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetGroupFastTriggerDCOffset(self.handle, 0, counts as u32) })
        }

        fn set_channel_dc_offset(&mut self, channel: u8, counts: u16) -> Result<()> {
            check(unsafe {
                CAEN_DGTZ_SetChannelDCOffset(self.handle, channel as u32, counts as u32)
            })
        }

        fn channel_dc_offset(&mut self, channel: u8) -> Result<u32> {
            let mut counts: u32 = 0;
            check(unsafe {
                CAEN_DGTZ_GetChannelDCOffset(self.handle, channel as u32, &mut counts)
            })?;
            Ok(counts)
        }

        fn set_group_enable_mask(&mut self, mask: u32) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetGroupEnableMask(self.handle, mask) })
        }

        fn set_post_trigger_size(&mut self, percent: u32) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetPostTriggerSize(self.handle, percent) })
        }

        fn set_sampling_frequency(&mut self, frequency: Drs4Frequency) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SetDRS4SamplingFrequency(self.handle, frequency.code()) })
        }

        fn load_drs4_correction(&mut self, frequency: Drs4Frequency) -> Result<()> {
            check(unsafe { CAEN_DGTZ_LoadDRS4CorrectionData(self.handle, frequency.code()) })
        }

        fn set_drs4_correction(&mut self, enabled: bool) -> Result<()> {
            check(unsafe {
                if enabled {
                    CAEN_DGTZ_EnableDRS4Correction(self.handle)
                } else {
                    CAEN_DGTZ_DisableDRS4Correction(self.handle)
                }
            })
        }

        fn allocate_event(&mut self) -> Result<()> {
            let mut event: *mut c_void = ptr::null_mut();
            check(unsafe { CAEN_DGTZ_AllocateEvent(self.handle, &mut event) })?;
            self.event = event as *mut RawEvent;
            Ok(())
        }

        fn malloc_readout_buffer(&mut self) -> Result<()> {
            check(unsafe {
                CAEN_DGTZ_MallocReadoutBuffer(
                    self.handle,
                    &mut self.buffer,
                    &mut self.buffer_allocated,
                )
            })
        }

        fn free_event(&mut self) -> Result<()> {
            if self.event.is_null() {
                return Ok(());
            }
            let mut event = self.event as *mut c_void;
            let result = check(unsafe { CAEN_DGTZ_FreeEvent(self.handle, &mut event) });
            self.event = ptr::null_mut();
            result
        }

        fn free_readout_buffer(&mut self) -> Result<()> {
            if self.buffer.is_null() {
                return Ok(());
            }
            let result = check(unsafe { CAEN_DGTZ_FreeReadoutBuffer(&mut self.buffer) });
            self.buffer = ptr::null_mut();
            self.buffer_filled = 0;
            result
        }

        fn start_acquisition(&mut self) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SWStartAcquisition(self.handle) })
        }

        fn stop_acquisition(&mut self) -> Result<()> {
            check(unsafe { CAEN_DGTZ_SWStopAcquisition(self.handle) })
        }

        fn read_data(&mut self) -> Result<()> {
            check(unsafe {
                CAEN_DGTZ_ReadData(
                    self.handle,
                    READ_MODE_SLAVE_TERMINATED_MBLT,
                    self.buffer,
                    &mut self.buffer_filled,
                )
            })
        }

        fn num_events(&mut self) -> Result<u32> {
            let mut count: u32 = 0;
            check(unsafe {
                CAEN_DGTZ_GetNumEvents(self.handle, self.buffer, self.buffer_filled, &mut count)
            })?;
            Ok(count)
        }

        fn event(&mut self, index: u32) -> Result<(EventRecord, DecodedEvent)> {
            let mut raw_info = RawEventInfo::default();
            let mut event_ptr: *mut c_char = ptr::null_mut();
            check(unsafe {
                CAEN_DGTZ_GetEventInfo(
                    self.handle,
                    self.buffer,
                    self.buffer_filled,
                    index,
                    &mut raw_info,
                    &mut event_ptr,
                )
            })?;
            let mut event = self.event as *mut c_void;
            check(unsafe { CAEN_DGTZ_DecodeEvent(self.handle, event_ptr, &mut event) })?;
            self.event = event as *mut RawEvent;

            let record = EventRecord {
                event_size: raw_info.event_size,
                board_id: raw_info.board_id,
                pattern: raw_info.pattern,
                channel_mask: raw_info.channel_mask,
                event_counter: raw_info.event_counter,
                trigger_time_tag: raw_info.trigger_time_tag,
            };

            // Copy the decoded sample arrays out of the vendor-owned event
            // object; it is overwritten by the next DecodeEvent call.
            let raw_event = unsafe { &*self.event };
            let mut decoded = DecodedEvent::default();
            for g in 0..GROUPS_PER_EVENT {
                if raw_event.gr_present[g] == 0 {
                    continue;
                }
                let raw_group = &raw_event.data_group[g];
                let mut samples = Vec::with_capacity(CHANNELS_PER_GROUP);
                for j in 0..CHANNELS_PER_GROUP {
                    let n = raw_group.ch_size[j] as usize;
                    if n == 0 || raw_group.data_channel[j].is_null() {
                        samples.push(Vec::new());
                        continue;
                    }
                    let data = unsafe {
                        std::slice::from_raw_parts(raw_group.data_channel[j], n)
                    };
                    samples.push(data.to_vec());
                }
                decoded.groups[g] = Some(GroupData {
                    samples,
                    trigger_time_lag: raw_group.trigger_time_lag,
                    start_index_cell: raw_group.start_index_cell,
                });
            }
            Ok((record, decoded))
        }
    }

    impl Drop for CaenDigitizerLink {
        fn drop(&mut self) {
            // reverse order of acquisition: buffer, event object, handle
            if let Err(err) = self.free_readout_buffer() {
                log::warn!("could not free readout buffer: {}", err);
            }
            if let Err(err) = self.free_event() {
                log::warn!("could not free event object: {}", err);
            }
            let code = unsafe { CAEN_DGTZ_CloseDigitizer(self.handle) };
            if code != 0 {
                log::warn!("CloseDigitizer returned {}", code);
            }
        }
    }
}
