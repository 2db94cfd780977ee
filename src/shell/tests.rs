//! Unit tests for the shell negotiator
//!
//! Uses a mockall mock of the surface requests so the exact call order of
//! the configure/ack handshake can be asserted.

use super::*;
use crate::session::testing::{RecordingRequests, Request};
use crate::session::MockSurfaceRequests;
use mockall::predicate::eq;
use mockall::Sequence;

fn expect_creation(mock: &mut MockSurfaceRequests, seq: &mut Sequence) {
    mock.expect_create_surface()
        .times(1)
        .in_sequence(seq)
        .returning(|| Ok(()));
    mock.expect_create_shell_surface()
        .times(1)
        .in_sequence(seq)
        .returning(|| Ok(()));
    mock.expect_create_toplevel()
        .times(1)
        .in_sequence(seq)
        .returning(|| Ok(()));
    mock.expect_set_title()
        .times(1)
        .in_sequence(seq)
        .returning(|_| Ok(()));
    mock.expect_commit()
        .times(1)
        .in_sequence(seq)
        .returning(|| Ok(()));
}

#[test]
fn test_creation_order_and_initial_commit() {
    let mut mock = MockSurfaceRequests::new();
    let mut seq = Sequence::new();
    expect_creation(&mut mock, &mut seq);

    let negotiator = ShellNegotiator::create("adjimg", 640, 480, &mut mock).unwrap();
    assert_eq!(negotiator.state(), ShellState::AwaitingConfigure);
    assert_eq!(negotiator.commit_count(), 1);
    assert_eq!(negotiator.last_acked_serial(), None);
}

#[test]
fn test_configure_acks_before_attach_damage_commit() {
    let mut mock = MockSurfaceRequests::new();
    let mut seq = Sequence::new();
    expect_creation(&mut mock, &mut seq);

    mock.expect_ack_configure()
        .with(eq(42))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    mock.expect_attach()
        .with(eq(0), eq(0))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    mock.expect_damage()
        .with(eq(0), eq(0), eq(640), eq(480))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _, _| Ok(()));
    mock.expect_commit()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));

    let mut negotiator = ShellNegotiator::create("adjimg", 640, 480, &mut mock).unwrap();
    negotiator.configure(42, true, &mut mock).unwrap();

    assert_eq!(negotiator.state(), ShellState::Committed);
    assert_eq!(negotiator.last_acked_serial(), Some(42));
    assert_eq!(negotiator.commit_count(), 2);
}

#[test]
fn test_reconfigure_reacks_and_represents() {
    let mut requests = RecordingRequests::default();
    let mut negotiator = ShellNegotiator::create("adjimg", 640, 480, &mut requests).unwrap();

    negotiator.configure(1, true, &mut requests).unwrap();
    negotiator.configure(2, true, &mut requests).unwrap();

    assert_eq!(negotiator.state(), ShellState::Committed);
    assert_eq!(negotiator.last_acked_serial(), Some(2));
    assert_eq!(negotiator.configure_count(), 2);
    assert_eq!(requests.count(&Request::Attach(0, 0)), 2);

    let second_ack = requests.position(&Request::AckConfigure(2)).unwrap();
    let attaches: Vec<usize> = requests
        .calls
        .iter()
        .enumerate()
        .filter(|(_, call)| **call == Request::Attach(0, 0))
        .map(|(i, _)| i)
        .collect();
    assert!(attaches[1] > second_ack);
}

#[test]
fn test_unfilled_buffer_is_never_attached() {
    let mut requests = RecordingRequests::default();
    let mut negotiator = ShellNegotiator::create("adjimg", 640, 480, &mut requests).unwrap();

    let result = negotiator.configure(5, false, &mut requests);
    assert!(matches!(
        result,
        Err(ClientError::Shell(ShellError::BufferNotReady { serial: 5 }))
    ));
    assert_eq!(negotiator.state(), ShellState::Configured);
    assert!(requests.position(&Request::AckConfigure(5)).is_some());
    assert_eq!(requests.count(&Request::Attach(0, 0)), 0);
}

#[test]
fn test_ping_answers_with_same_serial() {
    let mut mock = MockSurfaceRequests::new();
    mock.expect_pong()
        .with(eq(77))
        .times(1)
        .returning(|_| Ok(()));

    ShellNegotiator::ping(77, &mut mock).unwrap();
}

#[test]
fn test_failed_ack_stops_presentation() {
    let mut mock = MockSurfaceRequests::new();
    let mut seq = Sequence::new();
    expect_creation(&mut mock, &mut seq);
    mock.expect_ack_configure()
        .times(1)
        .returning(|_| Err(ClientError::ObjectCreation("xdg_surface")));
    mock.expect_attach().times(0);

    let mut negotiator = ShellNegotiator::create("adjimg", 640, 480, &mut mock).unwrap();
    assert!(negotiator.configure(3, true, &mut mock).is_err());
    assert_eq!(negotiator.state(), ShellState::AwaitingConfigure);
    assert_eq!(negotiator.last_acked_serial(), None);
}
