use custody_types::{AccountId, CustodyError, CustodyResult};

/// Carries out `Call` operations approved by the owners.
pub trait CallGateway: Send + Sync {
    fn call(&self, destination: &AccountId, value: u64, data: &[u8]) -> CustodyResult<()>;
}

/// Refuses every call. Installed when no gateway is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectingGateway;

impl CallGateway for RejectingGateway {
    fn call(&self, destination: &AccountId, _value: u64, _data: &[u8]) -> CustodyResult<()> {
        Err(CustodyError::InvalidPayload(format!(
            "no call gateway configured for {destination}"
        )))
    }
}
