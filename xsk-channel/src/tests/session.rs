use std::collections::HashSet;
use std::io;
use std::time::Duration;

use crate::config::XdpConfig;
use crate::error::{RingError, SetupError};
use crate::frame::FrameState;
use crate::poll::Readiness;
use crate::ring::{RingKind, XdpDesc};
use crate::session::{Session, SessionSetup, SessionState, open_session_with};
use crate::tests::init_logger;
use crate::tests::peer::PeerRing;
use crate::tests::sim::{Shared, SimChannel};

fn open(config: XdpConfig) -> (Result<Session<SimChannel>, SetupError>, Shared) {
    init_logger();
    let (channel, state) = SimChannel::new().unwrap();
    let config = XdpConfig {
        huge_page: Some(false),
        ..config
    };
    (open_session_with(config, move || Ok(channel)), state)
}

fn small() -> XdpConfig {
    XdpConfig {
        frame_count: 32,
        prefill: Some(0),
        huge_page: Some(false),
        ..XdpConfig::default().with_ring_depth(64)
    }
}

#[test]
fn default_session_is_ready_with_four_mappings() {
    let (session, state) = open(XdpConfig::default());
    let session = session.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.raw_fd() >= 0);

    let addrs: HashSet<_> = [
        session.fill().map_addr(),
        session.completion().map_addr(),
        session.rx().map_addr(),
        session.tx().map_addr(),
    ]
    .into_iter()
    .inspect(|a| assert!(!a.is_null()))
    .map(|a| a as usize)
    .collect();
    assert_eq!(addrs.len(), 4);

    let st = state.borrow();
    assert_eq!(st.offset_queries, 1);
    assert_eq!(st.mapped.len(), 4);
    assert_eq!(st.live_mappings(), 4);
    // Half of the pool is offered for reception.
    assert_eq!(session.fill().cursors(), (128, 0));
    assert_eq!(session.frames().free_count(), 128);
}

#[test]
fn fill_to_rx_handoff() {
    let (session, state) = open(small());
    let mut session = session.unwrap();
    let fill = PeerRing::<u64>::attach(&state, RingKind::Fill);
    let rx = PeerRing::<XdpDesc>::attach(&state, RingKind::Rx);

    assert_eq!(session.refill(4).unwrap(), 4);
    let offered = fill.consume(64);
    assert_eq!(offered.len(), 4);

    // The kernel writes each packet into a frame it was given.
    let descs: Vec<_> = offered
        .iter()
        .enumerate()
        .map(|(i, addr)| {
            let data = session.umem_mut().frames_mut().frame_mut(*addr, 60).unwrap();
            data.fill(i as u8);
            XdpDesc::new(*addr, 60, 0)
        })
        .collect();
    assert_eq!(rx.produce(&descs), 4);

    assert_eq!(session.rx_mut().reserve_consumer_slots(64), 4);

    let mut payloads = Vec::new();
    let delivered = session.receive(64, |data| payloads.push(data.to_vec())).unwrap();
    assert_eq!(delivered, 4);
    assert_eq!(payloads, (0..4u8).map(|i| vec![i; 60]).collect::<Vec<_>>());
    assert_eq!(rx.consumer(), 4);
    assert_eq!(session.stats().rx_packets, 4);
    assert_eq!(session.frames().free_count(), 32);
}

#[test]
fn rx_descriptor_for_a_frame_never_offered_is_dropped() {
    let (session, state) = open(small());
    let mut session = session.unwrap();
    let rx = PeerRing::<XdpDesc>::attach(&state, RingKind::Rx);
    rx.produce(&[XdpDesc::new(2048, 60, 0)]);
    assert_eq!(session.receive(8, |_| panic!("delivered a foreign frame")).unwrap(), 0);
    assert_eq!(rx.consumer(), 1);
    assert_eq!(session.frames().state(2048), Some(FrameState::Free));
}

#[test]
fn zero_depth_fails_and_rolls_back() {
    init_logger();
    let (channel, state) = SimChannel::new().unwrap();
    let mut setup = SessionSetup::new(XdpConfig {
        rx_depth: 0,
        huge_page: Some(false),
        ..XdpConfig::default()
    });
    setup.open_channel_with(move || Ok(channel)).unwrap();
    setup.register_umem().unwrap();
    let err = setup.configure_rings().unwrap_err();
    assert!(matches!(err, SetupError::Configuration { ring: RingKind::Rx, depth: 0, .. }));
    assert_eq!(err.stage(), SessionState::RingsConfigured);
    assert_eq!(setup.state(), SessionState::Failed);
    assert!(setup.channel().is_none());

    let st = state.borrow();
    assert!(st.closed);
    assert!(st.mapped.is_empty());
    assert_eq!(st.live_mappings(), 0);
}

#[test]
fn zero_fill_depth_fails_while_registering_the_umem() {
    let (session, state) = open(XdpConfig {
        fill_depth: 0,
        ..XdpConfig::default()
    });
    let err = session.err().unwrap();
    assert_eq!(err.stage(), SessionState::UmemRegistered);
    assert!(state.borrow().closed);
}

#[test]
fn mapping_failure_unmaps_earlier_rings() {
    init_logger();
    let (channel, state) = SimChannel::new().unwrap();
    state.borrow_mut().fail_map = Some(RingKind::Tx);
    let mut setup = SessionSetup::new(small());
    setup.open_channel_with(move || Ok(channel)).unwrap();
    setup.register_umem().unwrap();
    setup.configure_rings().unwrap();
    let err = setup.map_rings().unwrap_err();
    assert!(matches!(err, SetupError::Mapping { ring: RingKind::Tx, .. }));
    assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));
    assert_eq!(setup.state(), SessionState::Failed);

    let st = state.borrow();
    assert_eq!(st.mapped, [RingKind::Fill, RingKind::Completion, RingKind::Rx]);
    assert_eq!(st.live_mappings(), 0);
    assert!(st.closed);
}

#[test]
fn mapping_before_configuring_is_an_ordering_error() {
    init_logger();
    let (channel, state) = SimChannel::new().unwrap();
    let mut setup = SessionSetup::new(small());
    setup.open_channel_with(move || Ok(channel)).unwrap();
    let err = setup.map_rings().unwrap_err();
    assert!(matches!(
        err,
        SetupError::Ordering {
            attempted: SessionState::RingsMapped,
            current: SessionState::ChannelOpen,
        }
    ));
    assert_eq!(setup.state(), SessionState::Failed);
    assert!(state.borrow().mapped.is_empty());
    assert!(state.borrow().closed);

    // Nothing runs after a failure.
    assert!(matches!(setup.register_umem(), Err(SetupError::Ordering { .. })));
}

#[test]
fn registration_failure_closes_the_channel() {
    let (channel, state) = SimChannel::new().unwrap();
    state.borrow_mut().fail_register = true;
    let err = open_session_with(small(), move || Ok(channel)).err().unwrap();
    assert!(matches!(err, SetupError::Registration(_)));
    assert_eq!(err.stage(), SessionState::UmemRegistered);
    assert!(state.borrow().closed);
}

#[test]
fn channel_failure_is_tagged() {
    let err = open_session_with::<SimChannel, _>(small(), || {
        Err(io::Error::from_raw_os_error(libc::EAFNOSUPPORT))
    })
    .err()
    .unwrap();
    assert!(matches!(err, SetupError::Channel(_)));
    assert_eq!(err.stage(), SessionState::ChannelOpen);
    assert_eq!(err.raw_os_error(), Some(libc::EAFNOSUPPORT));
}

#[test]
fn dropping_a_session_releases_everything() {
    let (session, state) = open(small());
    drop(session.unwrap());
    let st = state.borrow();
    assert!(st.closed);
    assert_eq!(st.live_mappings(), 0);
}

#[test]
fn transmit_and_complete() {
    let (session, state) = open(small());
    let mut session = session.unwrap();
    let tx = PeerRing::<XdpDesc>::attach(&state, RingKind::Tx);
    let cr = PeerRing::<u64>::attach(&state, RingKind::Completion);

    let packets: [&[u8]; 3] = [b"one", b"two!", b"three"];
    assert_eq!(session.send_batch(&packets).unwrap(), 3);
    assert_eq!(session.stats().outstanding_tx, 3);
    assert_eq!(session.stats().tx_packets, 3);

    let sent = tx.consume(64);
    assert_eq!(sent.len(), 3);
    for (desc, expected) in sent.iter().zip(packets) {
        assert_eq!(session.frames().frame(desc.addr, desc.len as usize).unwrap(), expected);
        assert_eq!(session.frames().state(desc.addr), Some(FrameState::Tx));
    }

    let addrs: Vec<_> = sent.iter().map(|d| d.addr).collect();
    cr.produce(&addrs);
    assert_eq!(session.complete(64).unwrap(), 3);
    assert_eq!(session.stats().outstanding_tx, 0);
    assert_eq!(session.frames().free_count(), 32);
}

#[test]
fn fabricated_completions_are_not_counted() {
    let (session, state) = open(small());
    let mut session = session.unwrap();
    let cr = PeerRing::<u64>::attach(&state, RingKind::Completion);

    session.send(b"ping").unwrap();
    let sent = PeerRing::<XdpDesc>::attach(&state, RingKind::Tx).consume(1)[0].addr;
    // A frame never sent, then the real one twice.
    cr.produce(&[sent + 2048, sent, sent]);
    assert_eq!(session.complete(64).unwrap(), 1);
    assert_eq!(session.stats().outstanding_tx, 0);
    assert_eq!(cr.consumer(), 3);
}

#[test]
fn tx_addresses_are_never_reused_while_in_flight() {
    let (session, state) = open(small());
    let mut session = session.unwrap();
    for _ in 0..32 {
        session.send(&[0u8; 64]).unwrap();
    }
    assert!(matches!(session.send(b"x"), Err(RingError::NoFreeFrame)));

    let queued = PeerRing::<XdpDesc>::attach(&state, RingKind::Tx).consume(64);
    assert_eq!(queued.len(), 32);
    let addrs: HashSet<_> = queued.iter().map(|d| d.addr).collect();
    assert_eq!(addrs.len(), 32);
}

#[test]
fn full_tx_ring_is_reported() {
    let (session, _state) = open(XdpConfig {
        tx_depth: 4,
        ..small()
    });
    let mut session = session.unwrap();
    for _ in 0..4 {
        session.send(b"data").unwrap();
    }
    assert!(matches!(session.send(b"data"), Err(RingError::RingFull)));
    assert_eq!(session.stats().outstanding_tx, 4);
}

#[test]
fn oversized_payload_is_refused() {
    let (session, _state) = open(small());
    let mut session = session.unwrap();
    let err = session.send(&[0u8; 2049]).unwrap_err();
    assert!(matches!(err, RingError::InvalidLength(2049)));
    assert_eq!(session.frames().free_count(), 32);
}

#[test]
fn send_reclaims_completions_when_the_pool_is_empty() {
    let (session, state) = open(small());
    let mut session = session.unwrap();
    let tx = PeerRing::<XdpDesc>::attach(&state, RingKind::Tx);
    let cr = PeerRing::<u64>::attach(&state, RingKind::Completion);
    for _ in 0..32 {
        session.send(b"fill").unwrap();
    }
    let done: Vec<_> = tx.consume(2).iter().map(|d| d.addr).collect();
    cr.produce(&done);
    session.send(b"again").unwrap();
    assert_eq!(session.stats().outstanding_tx, 31);
}

#[test]
fn kick_only_when_the_kernel_asks() {
    let (session, state) = open(small());
    let session = session.unwrap();
    session.kick().unwrap();
    assert_eq!(state.borrow().wakeups, 0);

    PeerRing::<XdpDesc>::attach(&state, RingKind::Tx).set_need_wakeup(true);
    session.kick().unwrap();
    assert!(session.poll_wait(Readiness::Readable, Some(Duration::from_millis(1))).unwrap());
    assert_eq!(state.borrow().wakeups, 2);
}

#[test]
fn bind_moves_to_bound_once() {
    let (session, state) = open(XdpConfig {
        zero_copy: Some(true),
        ..small()
    });
    let mut session = session.unwrap();
    session.bind(3, 1).unwrap();
    assert_eq!(session.state(), SessionState::Bound);
    let addr = state.borrow().bound.unwrap();
    assert_eq!((addr.sxdp_ifindex, addr.sxdp_queue_id), (3, 1));
    assert_eq!(addr.sxdp_flags, libc::XDP_ZEROCOPY | libc::XDP_USE_NEED_WAKEUP);

    let err = session.bind(3, 1).unwrap_err();
    assert!(matches!(
        err,
        SetupError::Ordering { attempted: SessionState::Bound, current: SessionState::Bound }
    ));
}

#[test]
fn counters_roll_per_interval() {
    let (session, _state) = open(small());
    let mut session = session.unwrap();
    let batch: [&[u8]; 2] = [b"a", b"b"];
    session.send_batch(&batch).unwrap();
    let first = session.roll_interval();
    assert_eq!((first.rx_packets, first.tx_packets), (0, 2));
    session.send(b"c").unwrap();
    assert_eq!(session.roll_interval().tx_packets, 1);
    assert_eq!(session.stats().prev_tx_packets, 3);
}

#[test]
fn kick_always_wakes_without_the_need_wakeup_flag() {
    let (session, state) = open(XdpConfig {
        need_wakeup: Some(false),
        ..small()
    });
    let mut session = session.unwrap();
    assert!(!session.tx().needs_wakeup());

    session.send_and_kick(b"hello").unwrap();
    assert_eq!(state.borrow().wakeups, 1);
    assert_eq!(session.stats().tx_packets, 1);

    session.poll_wait(Readiness::Writable, Some(Duration::ZERO)).unwrap();
    assert_eq!(state.borrow().wakeups, 2);
}

#[test]
fn send_and_kick_queues_then_wakes() {
    let (session, state) = open(small());
    let mut session = session.unwrap();
    let tx = PeerRing::<XdpDesc>::attach(&state, RingKind::Tx);

    session.send_and_kick(b"quiet").unwrap();
    assert_eq!(state.borrow().wakeups, 0);

    tx.set_need_wakeup(true);
    session.send_and_kick(b"wake").unwrap();
    assert_eq!(state.borrow().wakeups, 1);

    let queued = tx.consume(8);
    assert_eq!(queued.len(), 2);
    assert_eq!(session.frames().frame(queued[1].addr, 4).unwrap(), b"wake");

    let err = session.send_and_kick(&[0u8; 4096]).unwrap_err();
    assert!(matches!(err, RingError::InvalidLength(4096)));
    assert_eq!(state.borrow().wakeups, 1);
}

#[test]
fn poll_wait_reports_a_timeout() {
    let (session, state) = open(small());
    let session = session.unwrap();
    state.borrow_mut().idle = true;
    let ready = session
        .poll_wait(Readiness::Either, Some(Duration::from_millis(5)))
        .unwrap();
    assert!(!ready);

    state.borrow_mut().idle = false;
    assert!(session.poll_wait(Readiness::Either, None).unwrap());
}
