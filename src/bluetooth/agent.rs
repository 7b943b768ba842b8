use bluer::agent::{
    Agent, AuthorizeService, RequestAuthorization, RequestConfirmation, RequestPasskey,
    RequestPinCode,
};
use futures::FutureExt;
use tracing::info;

use super::device::BluetoothAddress;

/// Pairing agent behaviour: accept everything, answer PIN prompts with a
/// fixed code, never ask the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPolicy {
    pin_code: String,
}

impl AgentPolicy {
    pub fn new(pin_code: impl Into<String>) -> Self {
        Self {
            pin_code: pin_code.into(),
        }
    }

    pub fn pin_code(&self) -> &str {
        &self.pin_code
    }

    pub fn pin_code_for(&self, device: BluetoothAddress) -> String {
        info!("Agent: PIN code requested by {}", device);
        self.pin_code.clone()
    }

    pub fn passkey_for(&self, device: BluetoothAddress) -> u32 {
        info!("Agent: passkey requested by {}", device);
        0
    }

    pub fn confirm(&self, device: BluetoothAddress, passkey: u32) -> bool {
        info!("Agent: confirming passkey {:06} for {}", passkey, device);
        true
    }

    pub fn authorize(&self, device: BluetoothAddress) -> bool {
        info!("Agent: authorizing {}", device);
        true
    }

    /// Build the daemon-side agent. Registered as the default agent.
    pub fn to_agent(&self) -> Agent {
        let pin = self.clone();
        let passkey = self.clone();
        let confirm = self.clone();
        let authorize = self.clone();
        let service = self.clone();

        Agent {
            request_default: true,
            request_pin_code: Some(Box::new(move |req: RequestPinCode| {
                let code = pin.pin_code_for(BluetoothAddress::new(req.device.0));
                async move { Ok(code) }.boxed()
            })),
            request_passkey: Some(Box::new(move |req: RequestPasskey| {
                let key = passkey.passkey_for(BluetoothAddress::new(req.device.0));
                async move { Ok(key) }.boxed()
            })),
            request_confirmation: Some(Box::new(move |req: RequestConfirmation| {
                confirm.confirm(BluetoothAddress::new(req.device.0), req.passkey);
                async move { Ok(()) }.boxed()
            })),
            request_authorization: Some(Box::new(move |req: RequestAuthorization| {
                authorize.authorize(BluetoothAddress::new(req.device.0));
                async move { Ok(()) }.boxed()
            })),
            authorize_service: Some(Box::new(move |req: AuthorizeService| {
                service.authorize(BluetoothAddress::new(req.device.0));
                async move { Ok(()) }.boxed()
            })),
            ..Default::default()
        }
    }
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self::new("0000")
    }
}
