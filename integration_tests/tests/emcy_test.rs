//! Emergency module tests driving the full OD + CAN driver path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use cancore_common::{CanId, CanMessage, NmtState, NodeId};
use cancore_node::emcy::{
    emergency_code, register_bit, status_bit, Emcy, EmcyObjects, EmcyProducerObjects,
    EMCY_BUFFER_SIZE,
};
use cancore_node::can::error_flags;
use cancore_node::od::{self, OdError};
use integration_tests::mock_can::MockCan;
use integration_tests::object_dict::{OD_PERSIST_COMM, OD_TABLE};
use serial_test::serial;

static EMCY: Emcy = Emcy::new();

type RxEvent = (u16, u16, u8, u8, u32);
static RX_EVENTS: Mutex<Vec<RxEvent>> = Mutex::new(Vec::new());

fn rx_callback(ident: u16, error_code: u16, error_register: u8, error_bit: u8, info_code: u32) {
    RX_EVENTS
        .lock()
        .unwrap()
        .push((ident, error_code, error_register, error_bit, info_code));
}

/// Reset OD storage and bring up the emergency module on a fresh mock driver
fn setup(node_id: u8) -> &'static MockCan {
    OD_PERSIST_COMM.x1014_cob_id_emcy.set(0x0000_0080);
    OD_PERSIST_COMM.x1001_error_register.set(0xFF);
    RX_EVENTS.lock().unwrap().clear();

    let can = Box::leak(Box::new(MockCan::new()));
    EMCY.init(
        &EmcyObjects {
            error_register: od::find(&OD_TABLE, 0x1001).unwrap(),
            producer: Some(EmcyProducerObjects {
                cob_id_emcy: od::find(&OD_TABLE, 0x1014).unwrap(),
                tx_slot: 0,
                inhibit_time: od::find(&OD_TABLE, 0x1015),
            }),
            error_history: od::find(&OD_TABLE, 0x1003),
            status_bits: od::find(&OD_TABLE, 0x2100),
        },
        can,
        Some(1),
        NodeId::new(node_id).unwrap(),
    )
    .unwrap();
    can
}

fn frame_code(data: &[u8; 8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn frame_bit(data: &[u8; 8]) -> u8 {
    data[3]
}

#[test]
#[serial]
fn test_init_configures_producer() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(5);

    // default COB-ID form puts 0x80 + node id on the wire
    let config = can.tx_config(0).unwrap();
    assert_eq!(0x85, config.can_id);
    assert!(!config.rtr);
    assert_eq!(8, config.dlc);
    assert!(!config.sync_frame);

    // the error register was borrowed and cleared
    assert_eq!(0, OD_PERSIST_COMM.x1001_error_register.get());
}

#[test]
#[serial]
fn test_init_rejects_reserved_cob_id_bits() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    OD_PERSIST_COMM.x1014_cob_id_emcy.set(0x4000_0080);
    let can = Box::leak(Box::new(MockCan::new()));
    let result = EMCY.init(
        &EmcyObjects {
            error_register: od::find(&OD_TABLE, 0x1001).unwrap(),
            producer: Some(EmcyProducerObjects {
                cob_id_emcy: od::find(&OD_TABLE, 0x1014).unwrap(),
                tx_slot: 0,
                inhibit_time: None,
            }),
            error_history: None,
            status_bits: None,
        },
        can,
        None,
        NodeId::new(1).unwrap(),
    );
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_bus_off_emergency_frame() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);

    EMCY.error_report(
        status_bit::CAN_TX_BUS_OFF,
        emergency_code::BUS_OFF_RECOVERED,
        0xDEAD_BEEF,
    );
    EMCY.process(NmtState::Operational, 1000, None);

    let sent = can.take_sent();
    assert_eq!(1, sent.len());
    let (slot, data) = sent[0];
    assert_eq!(0, slot);
    assert_eq!([0x40, 0x81, 0x10, 0x12, 0xEF, 0xBE, 0xAD, 0xDE], data);

    // the error register follows the communication error class
    assert_eq!(
        register_bit::COMMUNICATION,
        OD_PERSIST_COMM.x1001_error_register.get()
    );

    // reporting the identical condition again produces nothing
    EMCY.error_report(
        status_bit::CAN_TX_BUS_OFF,
        emergency_code::BUS_OFF_RECOVERED,
        0xDEAD_BEEF,
    );
    EMCY.process(NmtState::Operational, 1000, None);
    assert!(can.take_sent().is_empty());
}

#[test]
#[serial]
fn test_inhibit_pacing() {
    // 100 * 100us = 10ms inhibit time, loaded from the OD at init
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(100);
    let can = setup(1);

    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 0);
    EMCY.error_report(
        status_bit::MANUFACTURER_START,
        emergency_code::SOFTWARE_DEVICE,
        0,
    );

    // first frame goes out immediately
    EMCY.process(NmtState::Operational, 1000, None);
    assert_eq!(1, can.take_sent().len());

    // with a pending message and the inhibit timer running, the next-wake
    // hint reports the remaining inhibit time
    let mut timer_next = u32::MAX;
    EMCY.process(NmtState::Operational, 0, Some(&mut timer_next));
    assert_eq!(10_000, timer_next);

    // the second frame is held back for a full inhibit period
    for _ in 0..9 {
        EMCY.process(NmtState::Operational, 1000, None);
        assert!(can.take_sent().is_empty());
    }
    EMCY.process(NmtState::Operational, 1000, None);
    let sent = can.take_sent();
    assert_eq!(1, sent.len());
    assert_eq!(status_bit::MANUFACTURER_START, frame_bit(&sent[0].1));
}

#[test]
#[serial]
fn test_cob_id_change_while_enabled() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);
    let entry = od::find(&OD_TABLE, 0x1014).unwrap();

    // producer is enabled at the default id, which reads back as 0x81
    assert_eq!(Ok(0x0000_0081u32), od::get_value(entry, 0, false));

    // changing the CAN id while enabled is refused and leaves the driver
    // configuration alone
    assert_eq!(
        Err(OdError::InvalidValue),
        od::set_value(entry, 0, 0x0000_0082u32, false)
    );
    assert_eq!(0x81, can.tx_config(0).unwrap().can_id);

    // disable first, then enable at the new id
    od::set_value(entry, 0, 0x8000_0081u32, false).unwrap();
    assert_eq!(Ok(0x8000_0081u32), od::get_value(entry, 0, false));
    od::set_value(entry, 0, 0x0000_0082u32, false).unwrap();
    assert_eq!(Ok(0x0000_0082u32), od::get_value(entry, 0, false));
    assert_eq!(0x82, can.tx_config(0).unwrap().can_id);

    // the write is passed through to the OD storage
    assert_eq!(0x0000_0082, OD_PERSIST_COMM.x1014_cob_id_emcy.get());
}

#[test]
#[serial]
fn test_reserved_bits_rejected_on_write() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let _can = setup(1);
    let entry = od::find(&OD_TABLE, 0x1014).unwrap();

    assert_eq!(
        Err(OdError::InvalidValue),
        od::set_value(entry, 0, 0x0001_0081u32, false)
    );
}

#[test]
#[serial]
fn test_inhibit_time_write_through_extension() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);
    let entry = od::find(&OD_TABLE, 0x1015).unwrap();

    // 50 * 100us = 5ms
    od::set_value(entry, 0, 50u16, false).unwrap();
    assert_eq!(50, OD_PERSIST_COMM.x1015_inhibit_time_emcy.get());
    // the write also reset the inhibit timer, so the next frame waits for a
    // full period
    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 0);
    for _ in 0..4 {
        EMCY.process(NmtState::Operational, 1000, None);
        assert!(can.take_sent().is_empty());
    }
    EMCY.process(NmtState::Operational, 1000, None);
    assert_eq!(1, can.take_sent().len());

    // reads pass through to the stored value
    assert_eq!(Ok(50u16), od::get_value(entry, 0, false));
}

#[test]
#[serial]
fn test_error_history_via_od() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let _can = setup(1);
    let entry = od::find(&OD_TABLE, 0x1003).unwrap();

    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 1);
    EMCY.error_report(status_bit::SYNC_TIMEOUT, emergency_code::COMMUNICATION, 2);
    EMCY.error_report(
        status_bit::NON_VOLATILE_MEMORY,
        emergency_code::HARDWARE,
        3,
    );

    assert_eq!(Ok(3u8), od::get_value(entry, 0, false));

    // newest first
    let newest: u32 = od::get_value(entry, 1, false).unwrap();
    assert_eq!(status_bit::NON_VOLATILE_MEMORY, (newest >> 24) as u8);
    assert_eq!(emergency_code::HARDWARE, (newest & 0xFFFF) as u16);
    let middle: u32 = od::get_value(entry, 2, false).unwrap();
    assert_eq!(status_bit::SYNC_TIMEOUT, (middle >> 24) as u8);
    let oldest: u32 = od::get_value(entry, 3, false).unwrap();
    assert_eq!(status_bit::GENERIC_ERROR, (oldest >> 24) as u8);

    // past the stored count there is no data
    assert_eq!(Err(OdError::NoData), od::get_value::<u32>(entry, 4, false));

    // writing zero clears the history
    od::set_value(entry, 0, 0u8, false).unwrap();
    assert_eq!(Ok(0u8), od::get_value(entry, 0, false));
    assert_eq!(Err(OdError::NoData), od::get_value::<u32>(entry, 1, false));

    // only zero is accepted
    assert_eq!(
        Err(OdError::InvalidValue),
        od::set_value(entry, 0, 1u8, false)
    );
}

#[test]
#[serial]
fn test_fifo_overflow_episode() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);

    // overfill the FIFO from the manufacturer bit range
    let reported = EMCY_BUFFER_SIZE as u8 + 3;
    for i in 0..reported {
        EMCY.error_report(
            status_bit::MANUFACTURER_START + i,
            emergency_code::GENERIC,
            i as u32,
        );
    }

    let mut frames = Vec::new();
    for _ in 0..(reported as usize + 10) {
        EMCY.process(NmtState::Operational, 1000, None);
        frames.extend(can.take_sent());
    }

    // the dropped reports are gone; one EMERGENCY_BUFFER_FULL set/reset
    // pair marks the overflow episode
    let buffer_full: Vec<_> = frames
        .iter()
        .filter(|(_, d)| frame_bit(d) == status_bit::EMERGENCY_BUFFER_FULL)
        .collect();
    assert_eq!(2, buffer_full.len());
    assert_eq!(emergency_code::GENERIC, frame_code(&buffer_full[0].1));
    assert_eq!(emergency_code::NO_ERROR, frame_code(&buffer_full[1].1));
    assert_eq!(EMCY_BUFFER_SIZE + 2, frames.len());
    assert!(!EMCY.is_error_set(status_bit::EMERGENCY_BUFFER_FULL));
}

#[test]
#[serial]
fn test_consumer_receive() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);
    EMCY.set_rx_callback(Some(rx_callback));

    can.inject(CanMessage::new(
        CanId::Std(0x85),
        &[0x10, 0x81, 0x11, 0x05, 0xDD, 0xCC, 0xBB, 0xAA],
    ));
    // sync passes the hardware filter but is dropped in the callback
    can.inject(CanMessage::new(CanId::Std(0x80), &[1, 0, 0, 0, 0, 0, 0, 0]));

    let events = RX_EVENTS.lock().unwrap().clone();
    assert_eq!(vec![(0x85, 0x8110, 0x11, 0x05, 0xAABB_CCDD)], events);
}

#[test]
#[serial]
fn test_own_emergency_reported_to_consumer() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);
    EMCY.set_rx_callback(Some(rx_callback));

    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 0x42);
    EMCY.process(NmtState::Operational, 1000, None);

    assert_eq!(1, can.take_sent().len());
    let events = RX_EVENTS.lock().unwrap().clone();
    assert_eq!(1, events.len());
    let (ident, code, register, bit, info) = events[0];
    assert_eq!(0, ident);
    assert_eq!(emergency_code::GENERIC, code);
    assert_eq!(register_bit::GENERIC, register);
    assert_eq!(status_bit::GENERIC_ERROR, bit);
    assert_eq!(0x42, info);
}

#[test]
#[serial]
fn test_no_transmission_outside_pre_or_operational() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);

    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 0);
    EMCY.process(NmtState::Stopped, 1000, None);
    assert!(can.take_sent().is_empty());

    // the message was consumed, not deferred
    EMCY.process(NmtState::Operational, 1000, None);
    assert!(can.take_sent().is_empty());
}

#[test]
#[serial]
fn test_full_tx_buffer_defers_dispatch() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);

    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 0);
    can.set_tx_full(true);
    EMCY.process(NmtState::Operational, 1000, None);
    assert!(can.take_sent().is_empty());

    can.set_tx_full(false);
    EMCY.process(NmtState::Operational, 1000, None);
    assert_eq!(1, can.take_sent().len());
}

#[test]
#[serial]
fn test_driver_error_hysteresis() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);

    can.set_error_status(error_flags::TX_BUS_OFF);
    EMCY.process(NmtState::Operational, 1000, None);
    let sent = can.take_sent();
    assert_eq!(1, sent.len());
    assert_eq!(status_bit::CAN_TX_BUS_OFF, frame_bit(&sent[0].1));
    assert_eq!(emergency_code::BUS_OFF_RECOVERED, frame_code(&sent[0].1));

    // unchanged status produces nothing further
    EMCY.process(NmtState::Operational, 1000, None);
    assert!(can.take_sent().is_empty());

    // recovery clears the condition with a NO_ERROR emergency
    can.set_error_status(0);
    EMCY.process(NmtState::Operational, 1000, None);
    let sent = can.take_sent();
    assert_eq!(1, sent.len());
    assert_eq!(status_bit::CAN_TX_BUS_OFF, frame_bit(&sent[0].1));
    assert_eq!(emergency_code::NO_ERROR, frame_code(&sent[0].1));
    assert!(!EMCY.is_error_set(status_bit::CAN_TX_BUS_OFF));
}

#[test]
#[serial]
fn test_bus_warning_edge() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let can = setup(1);

    can.set_error_status(error_flags::RX_WARNING);
    EMCY.process(NmtState::Operational, 1000, None);
    let sent = can.take_sent();
    assert_eq!(1, sent.len());
    assert_eq!(status_bit::CAN_BUS_WARNING, frame_bit(&sent[0].1));

    // warning stays up while either direction reports it
    can.set_error_status(error_flags::RX_WARNING | error_flags::TX_WARNING);
    EMCY.process(NmtState::Operational, 1000, None);
    assert!(can.take_sent().is_empty());

    can.set_error_status(0);
    EMCY.process(NmtState::Operational, 1000, None);
    let sent = can.take_sent();
    assert_eq!(1, sent.len());
    assert_eq!(status_bit::CAN_BUS_WARNING, frame_bit(&sent[0].1));
    assert_eq!(emergency_code::NO_ERROR, frame_code(&sent[0].1));
}

#[test]
#[serial]
fn test_status_bits_via_od() {
    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let _can = setup(1);
    let entry = od::find(&OD_TABLE, 0x2100).unwrap();

    EMCY.error_report(status_bit::CAN_BUS_WARNING, emergency_code::NO_ERROR, 0);

    let (_, mut io) = entry.get_sub(0, false).unwrap();
    let mut bits = [0u8; 10];
    (io.read)(&mut io.stream, 0, &mut bits).unwrap();
    assert_eq!(1 << status_bit::CAN_BUS_WARNING, bits[0]);

    // writing an image replaces the tracked bits
    let (_, mut io) = entry.get_sub(0, false).unwrap();
    (io.write)(&mut io.stream, 0, &[0u8; 10]).unwrap();
    assert!(!EMCY.is_error_set(status_bit::CAN_BUS_WARNING));
}

#[test]
#[serial]
fn test_process_notify_callback() {
    static NOTIFY_COUNT: AtomicUsize = AtomicUsize::new(0);
    fn notify() {
        NOTIFY_COUNT.fetch_add(1, Ordering::Relaxed);
    }
    static NOTIFY: fn() = notify;

    OD_PERSIST_COMM.x1015_inhibit_time_emcy.set(0);
    let _can = setup(1);
    EMCY.set_process_notify_callback(&NOTIFY);

    let before = NOTIFY_COUNT.load(Ordering::Relaxed);
    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 0);
    assert_eq!(before + 1, NOTIFY_COUNT.load(Ordering::Relaxed));

    // an unchanged condition does not signal
    EMCY.error_report(status_bit::GENERIC_ERROR, emergency_code::GENERIC, 0);
    assert_eq!(before + 1, NOTIFY_COUNT.load(Ordering::Relaxed));
}
