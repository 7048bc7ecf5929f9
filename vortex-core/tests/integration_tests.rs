use std::time::{Duration, SystemTime};
use vortex_core::*;

#[test]
fn test_container_id_validation() {
    // Valid IDs
    assert!(ContainerId::new("test").is_ok());
    assert!(ContainerId::new("test-123").is_ok());
    assert!(ContainerId::new("test_456").is_ok());
    assert!(ContainerId::new("web.1").is_ok());
    assert!(ContainerId::new("a".repeat(128)).is_ok());

    // Invalid IDs
    assert!(ContainerId::new("").is_err());
    assert!(ContainerId::new("a".repeat(129)).is_err());
    assert!(ContainerId::new("-leading-dash").is_err());
    assert!(ContainerId::new("test space").is_err());
    assert!(ContainerId::new("test/path").is_err());
}

#[test]
fn test_container_id_serialization() {
    let id = ContainerId::new("test-123").unwrap();

    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"test-123\"");

    let deserialized: ContainerId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, deserialized);

    // Validation also applies on the way in
    assert!(serde_json::from_str::<ContainerId>("\"bad id\"").is_err());
}

#[test]
fn test_stop_request_parameters() {
    // Signal names as an API client would send them
    assert_eq!("SIGTERM".parse::<StopSignal>().unwrap(), StopSignal::Term);
    assert_eq!("kill".parse::<StopSignal>().unwrap(), StopSignal::Kill);
    assert_eq!(StopSignal::parse_or_default(None).unwrap(), StopSignal::Term);

    // Timeouts in seconds
    assert_eq!(StopTimeout::parse("0").unwrap(), StopTimeout::Immediate);
    assert_eq!(StopTimeout::parse("-1").unwrap(), StopTimeout::Unlimited);
    assert_eq!(
        StopTimeout::parse("20").unwrap(),
        StopTimeout::Grace(Duration::from_secs(20))
    );

    let err = StopTimeout::parse("invalid").unwrap_err();
    assert!(err.to_string().contains("parsing \"invalid\""));
}

#[test]
fn test_lifecycle_edges() {
    use State::*;

    // The stop path
    assert!(Running.can_transition_to(Stopping));
    assert!(Stopping.can_transition_to(Stopped));
    assert!(!Stopping.can_transition_to(Running));

    // The restart path
    assert!(Running.can_transition_to(Restarting));
    assert!(Restarting.can_transition_to(Running));
    assert!(Restarting.can_transition_to(Stopped));

    // Stopped containers may be started again
    assert!(Stopped.can_transition_to(Running));
    assert!(!Created.can_transition_to(Stopped));
}

#[test]
fn test_restart_policy_decisions() {
    let policy: RestartPolicy = "on-failure:2".parse().unwrap();
    assert!(policy.should_restart(1, 0));
    assert!(policy.should_restart(1, 1));
    assert!(!policy.should_restart(1, 2));
    assert!(!policy.should_restart(0, 0));

    assert!(RestartPolicy::Always.should_restart(0, 1_000));
    assert!(!RestartPolicy::No.should_restart(1, 0));
}

#[test]
fn test_container_event_serialization() {
    let event = ContainerEvent::Stopped {
        id: ContainerId::new("test").unwrap(),
        exit_code: 137,
        timestamp: SystemTime::UNIX_EPOCH,
    };

    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"type\":\"stopped\""));

    let deserialized: ContainerEvent = serde_json::from_str(&json).unwrap();
    match deserialized {
        ContainerEvent::Stopped { id, exit_code, .. } => {
            assert_eq!(id.as_str(), "test");
            assert_eq!(exit_code, 137);
        }
        _ => panic!("Wrong event type"),
    }
}

#[test]
fn test_error_messages() {
    let err = Error::NotFound {
        id: "test1234".to_string(),
    };
    assert_eq!(err.to_string(), "No such container: test1234");
    assert!(err.is_not_found());

    let err = Error::InvalidState {
        id: "web".to_string(),
        from: State::Running,
        to: State::Stopping,
        actual: State::Stopped,
    };
    assert!(err.to_string().contains("stopped"));
    assert!(!err.is_not_found());
}
