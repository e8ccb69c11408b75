// WhatsApp Gateway: Configuration
// GatewayConfig (Evolution API connection settings)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Instance name in Evolution API (the session name)
    pub instance_name: String,
    /// Evolution API base URL, without trailing slash
    pub api_url: String,
    /// Evolution API key, sent as the `apikey` header
    pub api_key: String,
    /// Where the gateway should post events (our `/webhook/whatsapp` route)
    pub webhook_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            instance_name: "cannoh_md".into(),
            api_url: "http://127.0.0.1:8085".into(),
            api_key: String::new(),
            webhook_url: "http://host.docker.internal:3000/webhook/whatsapp".into(),
        }
    }
}

impl GatewayConfig {
    /// `{api_url}/{path}/{instance}`
    pub(crate) fn instance_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.api_url, path.trim_matches('/'), self.instance_name)
    }
}
