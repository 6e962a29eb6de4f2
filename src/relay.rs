use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use crate::mystrom::RelayAction;
use crate::mystrom::client::SwitchClient;
use crate::registry::{Device, DeviceRegistry};

/// Commands waiting per switch before new ones are dropped.
const QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub device: String,
    pub action: RelayAction,
}

/// Parse `<root><device>/<action>` where `root` is `<prefix>cmd/relay/`.
pub fn parse_command_topic(topic: &str, root: &str) -> Result<Command> {
    let rest = topic
        .strip_prefix(root)
        .ok_or_else(|| BridgeError::MalformedTopic(topic.to_string()))?;
    let parts: Vec<&str> = rest.split('/').collect();
    let [device, action] = parts.as_slice() else {
        return Err(BridgeError::MalformedTopic(topic.to_string()));
    };
    Ok(Command {
        device: device.to_string(),
        action: RelayAction::parse(action),
    })
}

/// Routes inbound command messages to one worker per switch. Commands for
/// the same switch run one after another in arrival order; different
/// switches don't wait on each other.
pub struct CommandRelay {
    root: String,
    workers: HashMap<String, mpsc::Sender<RelayAction>>,
}

impl CommandRelay {
    pub fn spawn(
        registry: &DeviceRegistry,
        switch: SwitchClient,
        root: String,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let mut workers = HashMap::new();
        let mut handles = Vec::new();
        for device in registry.iter() {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            workers.insert(device.name.clone(), tx);
            handles.push(tokio::spawn(run_worker(
                device.clone(),
                switch.clone(),
                rx,
            )));
        }
        (Self { root, workers }, handles)
    }

    /// Handle one message from the command subscription. The payload is only
    /// logged; the topic alone decides what happens.
    pub fn on_command(&self, topic: &str, payload: &str) -> Result<()> {
        info!("mqtt: {}: {:?}", topic, payload);
        let command = parse_command_topic(topic, &self.root)?;
        let worker = self
            .workers
            .get(&command.device)
            .ok_or_else(|| BridgeError::UnknownDevice(command.device.clone()))?;
        match worker.try_send(command.action) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BridgeError::RelayQueueFull(command.device)),
            Err(TrySendError::Closed(_)) => Err(BridgeError::RelayWorkerGone(command.device)),
        }
    }
}

async fn run_worker(device: Device, switch: SwitchClient, mut rx: mpsc::Receiver<RelayAction>) {
    while let Some(action) = rx.recv().await {
        match switch.set_relay(&device.address, &action).await {
            Ok(()) => info!("Switched {} relay to state {}", device.name, action.state_token()),
            Err(e) => warn!("Relay command for {} failed: {}", device.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::testutil::{FakeSwitch, Reply};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const ROOT: &str = "mystrom2mqtt/cmd/relay/";

    fn switch_client() -> SwitchClient {
        SwitchClient::new(&HttpConfig {
            poll_interval: Duration::from_secs(30),
            report_timeout: Duration::from_secs(1),
            relay_timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    fn relay_for(devices: &[(&str, &str)]) -> (CommandRelay, Vec<JoinHandle<()>>) {
        let table: BTreeMap<String, String> = devices
            .iter()
            .map(|(n, a)| (n.to_string(), a.to_string()))
            .collect();
        CommandRelay::spawn(&DeviceRegistry::new(&table), switch_client(), ROOT.into())
    }

    #[test]
    fn topic_parses_into_device_and_action() {
        let cmd = parse_command_topic("mystrom2mqtt/cmd/relay/living/on", ROOT).unwrap();
        assert_eq!(cmd.device, "living");
        assert_eq!(cmd.action, RelayAction::On);

        let cmd = parse_command_topic("mystrom2mqtt/cmd/relay/solar/toggle", ROOT).unwrap();
        assert_eq!(cmd.action, RelayAction::Other("toggle".into()));
    }

    #[test]
    fn wrong_segment_count_is_malformed() {
        for topic in [
            "mystrom2mqtt/cmd/relay/living",
            "mystrom2mqtt/cmd/relay/living/on/now",
            "mystrom2mqtt/cmd/relay/",
            "other/cmd/relay/living/on",
        ] {
            assert!(
                matches!(parse_command_topic(topic, ROOT), Err(BridgeError::MalformedTopic(_))),
                "{topic} should be malformed"
            );
        }
    }

    #[tokio::test]
    async fn on_sends_state_1() {
        let switch = FakeSwitch::start(Reply::Status(200, "")).await;
        let (relay, _workers) = relay_for(&[("living", switch.address.as_str())]);

        relay.on_command("mystrom2mqtt/cmd/relay/living/on", "").unwrap();

        assert_eq!(switch.wait_for_requests(1).await, ["/relay?state=1"]);
    }

    #[tokio::test]
    async fn off_sends_state_0() {
        let switch = FakeSwitch::start(Reply::Status(200, "")).await;
        let (relay, _workers) = relay_for(&[("living", switch.address.as_str())]);

        relay.on_command("mystrom2mqtt/cmd/relay/living/off", "").unwrap();

        assert_eq!(switch.wait_for_requests(1).await, ["/relay?state=0"]);
    }

    #[tokio::test]
    async fn unknown_device_makes_no_request() {
        let switch = FakeSwitch::start(Reply::Status(200, "")).await;
        let (relay, _workers) = relay_for(&[("living", switch.address.as_str())]);

        let err = relay
            .on_command("mystrom2mqtt/cmd/relay/doesnotexist/on", "")
            .unwrap_err();

        assert!(matches!(err, BridgeError::UnknownDevice(name) if name == "doesnotexist"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(switch.requests().is_empty());
    }

    #[tokio::test]
    async fn malformed_topic_makes_no_request() {
        let switch = FakeSwitch::start(Reply::Status(200, "")).await;
        let (relay, _workers) = relay_for(&[("living", switch.address.as_str())]);

        assert!(relay.on_command("mystrom2mqtt/cmd/relay/living", "on").is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(switch.requests().is_empty());
    }

    #[tokio::test]
    async fn repeated_commands_are_not_deduplicated() {
        let switch = FakeSwitch::start(Reply::Status(200, "")).await;
        let (relay, _workers) = relay_for(&[("living", switch.address.as_str())]);

        relay.on_command("mystrom2mqtt/cmd/relay/living/on", "").unwrap();
        relay.on_command("mystrom2mqtt/cmd/relay/living/on", "").unwrap();

        assert_eq!(
            switch.wait_for_requests(2).await,
            ["/relay?state=1", "/relay?state=1"]
        );
    }

    #[tokio::test]
    async fn commands_to_one_switch_keep_their_order() {
        let switch = FakeSwitch::start(Reply::Status(200, "")).await;
        let (relay, _workers) = relay_for(&[("living", switch.address.as_str())]);

        for action in ["on", "off", "on", "off"] {
            relay
                .on_command(&format!("mystrom2mqtt/cmd/relay/living/{action}"), "")
                .unwrap();
        }

        assert_eq!(
            switch.wait_for_requests(4).await,
            ["/relay?state=1", "/relay?state=0", "/relay?state=1", "/relay?state=0"]
        );
    }

    #[tokio::test]
    async fn hung_switch_does_not_block_others() {
        let hung = FakeSwitch::start(Reply::Hang).await;
        let healthy = FakeSwitch::start(Reply::Status(200, "")).await;
        let (relay, _workers) = relay_for(&[
            ("living", hung.address.as_str()),
            ("solar", healthy.address.as_str()),
        ]);

        relay.on_command("mystrom2mqtt/cmd/relay/living/on", "").unwrap();
        relay.on_command("mystrom2mqtt/cmd/relay/solar/off", "").unwrap();

        assert_eq!(healthy.wait_for_requests(1).await, ["/relay?state=0"]);
    }
}
