//! Signing keys of local users.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub user_id: String,

    /// Published key id, e.g. `https://local.example/users/abc#main-key`
    pub key_id: String,

    pub public_key_pem: String,

    /// PKCS#8 PEM
    pub private_key_pem: String,
}
