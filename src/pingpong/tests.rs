use super::*;
use crate::sim::{configurable, CountingPin, SimCan, SimDependencies, SimFlexcan, Wire};
use std::rc::Rc;

type SimNode = Node<SimCan, SimDependencies, SimFlexcan, CountingPin>;

fn node(wire: &Rc<Wire>, role: Role, variant: Variant) -> SimNode {
    let dependencies = match variant {
        Variant::Classic => SimDependencies::oscillator(),
        Variant::Fd => SimDependencies::peripheral(),
    };
    let can = initialize(role, variant, configurable(wire, dependencies).unwrap()).unwrap();
    Node::new(role, can, CountingPin::default())
}

fn ram(node: &SimNode, word: usize) -> u32 {
    unsafe { node.can.registers() }.ram(word)
}

/// The pending frame reaches `first`, whose reply reaches `second`
fn round_trip(wire: &Wire, first: &mut SimNode, second: &mut SimNode) {
    assert_eq!(wire.deliver(), 1);
    assert_eq!(first.poll(), Ok(true));
    assert_eq!(wire.deliver(), 1);
    assert_eq!(second.poll(), Ok(true));
}

#[test]
fn roles_use_complementary_identifiers() {
    assert_eq!(Role::NodeA.rx_id().as_raw(), 0x511);
    assert_eq!(Role::NodeA.tx_id().as_raw(), 0x555);
    assert_eq!(Role::NodeB.rx_id(), Role::NodeA.tx_id());
    assert_eq!(Role::NodeB.tx_id(), Role::NodeA.rx_id());
}

#[test]
fn classic_payload_reaches_node_b() {
    let wire = Wire::new();
    let mut a = node(&wire, Role::NodeA, Variant::Classic);
    let mut b = node(&wire, Role::NodeB, Variant::Classic);

    a.start().unwrap();
    b.start().unwrap();
    assert_eq!(wire.pending(), 1);
    wire.deliver();

    // Receive buffer 4, four words per buffer
    assert_eq!(ram(&b, 16) >> 24 & 0xF, 0x2);
    assert_eq!(ram(&b, 16) >> 16 & 0xF, 8);
    assert_eq!(ram(&b, 17), 0x1554_0000);
    assert_eq!(ram(&b, 18), 0xA511_2233);
    assert_eq!(ram(&b, 19), 0x4455_6677);

    assert_eq!(b.poll(), Ok(true));
    assert_eq!(b.received(), 1);
    assert_eq!(ram(&b, 1), 0x1444_0000);
    assert_eq!(a.poll(), Ok(false));
}

#[test]
fn indicator_toggles_every_thousand_receptions() {
    let wire = Wire::new();
    let mut a = node(&wire, Role::NodeA, Variant::Classic);
    let mut b = node(&wire, Role::NodeB, Variant::Classic);

    a.start().unwrap();
    for _ in 0..4 * TOGGLE_EVERY {
        round_trip(&wire, &mut b, &mut a);
    }

    assert_eq!(a.received(), 4000);
    assert_eq!(b.received(), 4000);
    let (_, a_pin) = a.free();
    let (_, b_pin) = b.free();
    assert_eq!(a_pin.toggles, 4);
    assert_eq!(b_pin.toggles, 4);
}

#[test]
fn fd_exchange_carries_64_bytes() {
    let wire = Wire::new();
    let mut a = node(&wire, Role::NodeA, Variant::Fd);
    let mut b = node(&wire, Role::NodeB, Variant::Fd);

    a.start().unwrap();
    // Transmit buffer 0: EDL, BRS, DATA, SRR, DLC 15
    assert_eq!(ram(&a, 0), 0xCC4F_0000);
    wire.deliver();

    // Receive buffer 4, 18 words per buffer
    assert_eq!(ram(&b, 73), 0x1554_0000);
    assert_eq!(ram(&b, 74), 0xA511_2233);
    assert_eq!(ram(&b, 75), 0x4455_6677);
    for word in 76..90 {
        assert_eq!(ram(&b, word), 0);
    }

    assert_eq!(b.poll(), Ok(true));
    for _ in 0..TOGGLE_EVERY {
        round_trip(&wire, &mut a, &mut b);
    }
    assert_eq!(b.received(), 1001);
    assert_eq!(a.received(), 1000);
    let (_, pin) = a.free();
    assert_eq!(pin.toggles, 1);
}

#[test]
fn busy_reply_is_retried() {
    let wire = Wire::new();
    let mut a = node(&wire, Role::NodeA, Variant::Classic);
    let mut b = node(&wire, Role::NodeB, Variant::Classic);

    a.start().unwrap();
    wire.deliver();
    a.can.transmit_payload(NODE_B_ID, &PAYLOAD).unwrap();

    // B answers the first frame; the second is still on its way
    assert_eq!(b.poll(), Ok(true));
    assert_eq!(wire.pending(), 2);
    assert!(wire.deliver_next());

    // The answer to the second frame finds the transmit buffer busy
    assert_eq!(b.poll(), Ok(true));
    assert_eq!(wire.pending(), 1);
    assert!(b.reply_pending);

    assert!(wire.deliver_next());
    assert_eq!(b.poll(), Ok(false));
    assert!(!b.reply_pending);
    assert_eq!(wire.pending(), 1);
    assert_eq!(b.received(), 2);
}

#[test]
fn presets_match_the_register_layout() {
    assert_eq!(classic_timing().time_quanta_per_bit(), 16);
    assert_eq!(fd_nominal_timing().time_quanta_per_bit(), 80);
    assert_eq!(fd_data_timing().time_quanta_per_bit(), 20);
    assert_eq!(fd_mode().data_size(), DataSize::Bytes64);
}
