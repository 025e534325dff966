//! Onion ("layered") crypto (C4).
//!
//! A circuit's forward/backward AES-256-CTR streams per hop, and the
//! peel/add/encrypt/decrypt operations built on them. Client holds up to
//! three layers (Guard, Middle, Exit); a relay holds exactly one.
//!
//! `recognized` is checked purely by the `recognized == 0` shortcut (spec
//! §1 Non-goals, §9 open question b) — there is no running digest here.

use crate::primitives::aes256_ctr_apply;

/// One onion layer: a pair of keyed AES-256-CTR streams, one per
/// direction (spec §3).
pub struct OnionLayer {
    forward_key: [u8; 32],
    backward_key: [u8; 32],
    forward_iv: [u8; 16],
    backward_iv: [u8; 16],
    pub active: bool,
}

/// Split an 80-byte K_enc into `Kf | Kb | IVf | IVb` (spec §4.3). The two
/// 8-byte IV halves are zero-padded to a 16-byte CTR counter block.
pub fn unpack_key_material(k_enc: &[u8]) -> Option<([u8; 32], [u8; 32], [u8; 16], [u8; 16])> {
    if k_enc.len() != 80 {
        return None;
    }
    let mut kf = [0u8; 32];
    let mut kb = [0u8; 32];
    let mut ivf = [0u8; 16];
    let mut ivb = [0u8; 16];
    kf.copy_from_slice(&k_enc[0..32]);
    kb.copy_from_slice(&k_enc[32..64]);
    ivf[..8].copy_from_slice(&k_enc[64..72]);
    ivb[..8].copy_from_slice(&k_enc[72..80]);
    Some((kf, kb, ivf, ivb))
}

impl OnionLayer {
    pub fn from_key_material(k_enc: &[u8]) -> Option<Self> {
        let (forward_key, backward_key, forward_iv, backward_iv) = unpack_key_material(k_enc)?;
        Some(Self {
            forward_key,
            backward_key,
            forward_iv,
            backward_iv,
            active: true,
        })
    }

    fn apply_forward(&self, data: &mut [u8]) {
        aes256_ctr_apply(&self.forward_key, &self.forward_iv, data);
    }

    fn apply_backward(&self, data: &mut [u8]) {
        aes256_ctr_apply(&self.backward_key, &self.backward_iv, data);
    }
}

/// Checks the spec's "recognized" shortcut: bytes [1..3) of a RELAY
/// sub-cell (the `recognized` field) are zero.
fn is_recognized(payload: &[u8]) -> bool {
    payload.len() >= 3 && payload[1] == 0 && payload[2] == 0
}

/// Client-side onion state: up to three layers, indexed 0 (Guard), 1
/// (Middle), 2 (Exit).
pub struct ClientOnion {
    layers: Vec<Option<OnionLayer>>,
}

impl ClientOnion {
    pub fn new() -> Self {
        Self {
            layers: vec![None, None, None],
        }
    }

    pub fn install(&mut self, index: usize, layer: OnionLayer) {
        self.layers[index] = Some(layer);
    }

    pub fn layer_count(&self) -> usize {
        self.layers.iter().filter(|l| l.is_some()).count()
    }

    /// Encrypt for the forward (client -> exit) direction: apply layers
    /// in order Exit -> Middle -> Guard (spec §4.3, invariant I4).
    pub fn encrypt(&self, payload: &mut [u8]) {
        for layer in self.layers.iter().rev().flatten() {
            if layer.active {
                layer.apply_forward(payload);
            }
        }
    }

    /// Decrypt for the backward (exit -> client) direction: apply layers
    /// in order Guard -> Middle -> Exit (spec §4.3, invariant I4).
    pub fn decrypt(&self, payload: &mut [u8]) {
        for layer in self.layers.iter().flatten() {
            if layer.active {
                layer.apply_backward(payload);
            }
        }
    }
}

/// Relay-side onion state: exactly one layer.
pub struct RelayOnion {
    layer: OnionLayer,
}

impl RelayOnion {
    pub fn new(layer: OnionLayer) -> Self {
        Self { layer }
    }

    /// Peel one forward layer off a cell arriving from the previous hop.
    /// Returns whether the peeled payload is addressed to this relay
    /// (spec §4.3 / §4.5, invariant I2).
    pub fn peel(&self, payload: &mut [u8]) -> bool {
        self.layer.apply_forward(payload);
        is_recognized(payload)
    }

    /// Add one backward layer to a cell headed toward the previous hop
    /// (spec §4.3 / §4.5, invariant I3).
    pub fn add_back(&self, payload: &mut [u8]) {
        self.layer.apply_backward(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_material(seed: u8) -> Vec<u8> {
        (0..80u16).map(|i| (seed.wrapping_add(i as u8))).collect()
    }

    #[test]
    fn single_layer_round_trip() {
        // P3: with identical K_enc on both sides, decrypt(encrypt(x)) == x
        // for a payload of the exact payload length. AES-CTR is
        // self-inverse, so the client's forward-encrypt is undone by the
        // relay re-applying the same forward keystream.
        let km = key_material(1);

        let mut client = ClientOnion::new();
        client.install(0, OnionLayer::from_key_material(&km).unwrap());

        let original = vec![0xABu8; crate::cell::CELL_PAYLOAD_LEN];
        let mut payload = original.clone();

        client.encrypt(&mut payload);
        assert_ne!(payload, original);

        let relay = RelayOnion::new(OnionLayer::from_key_material(&km).unwrap());
        relay.peel(&mut payload);
        assert_eq!(payload, original);

        // And the reverse direction: relay adds a backward layer, client
        // decrypts it away.
        let mut reply = original.clone();
        relay.add_back(&mut reply);
        assert_ne!(reply, original);
        client.decrypt(&mut reply);
        assert_eq!(reply, original);
    }

    #[test]
    fn three_layer_onion_peels_in_order() {
        // P4: client encrypts through (Guard, Middle, Exit); sequential
        // peel by Guard, Middle, Exit yields the plaintext. recognized is
        // false at Guard/Middle, true at Exit.
        let guard_km = key_material(10);
        let middle_km = key_material(20);
        let exit_km = key_material(30);

        let mut client = ClientOnion::new();
        client.install(0, OnionLayer::from_key_material(&guard_km).unwrap());
        client.install(1, OnionLayer::from_key_material(&middle_km).unwrap());
        client.install(2, OnionLayer::from_key_material(&exit_km).unwrap());

        // Build a RELAY sub-cell whose recognized field becomes zero only
        // once every forward layer has been peeled off.
        let mut relay_cell =
            crate::cell::RelayCell::new(crate::cell::RelayCommand::Data, 1, b"hello".to_vec());
        relay_cell.recognized = 0;
        let original_payload = relay_cell.pack().unwrap();
        let mut payload = original_payload.clone();

        client.encrypt(&mut payload);

        let guard = RelayOnion::new(OnionLayer::from_key_material(&guard_km).unwrap());
        let middle = RelayOnion::new(OnionLayer::from_key_material(&middle_km).unwrap());
        let exit = RelayOnion::new(OnionLayer::from_key_material(&exit_km).unwrap());

        assert!(!guard.peel(&mut payload));
        assert!(!middle.peel(&mut payload));
        assert!(exit.peel(&mut payload));

        assert_eq!(payload, original_payload);
    }

    #[test]
    fn unpack_key_material_rejects_wrong_length() {
        assert!(unpack_key_material(&[0u8; 79]).is_none());
        assert!(unpack_key_material(&[0u8; 80]).is_some());
    }
}
