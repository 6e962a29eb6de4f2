use std::collections::BTreeMap;

/// A switch reachable over HTTP.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    /// Hostname, IP, or `host:port`.
    pub address: String,
}

/// Read-only name → device lookup, fixed at startup.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new(devices: &BTreeMap<String, String>) -> Self {
        let devices = devices
            .iter()
            .map(|(name, address)| {
                (
                    name.clone(),
                    Device {
                        name: name.clone(),
                        address: address.clone(),
                    },
                )
            })
            .collect();
        Self { devices }
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}
