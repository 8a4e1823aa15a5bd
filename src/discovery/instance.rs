use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Scheme used when an instance does not define one.
pub const DEFAULT_SCHEME: &str = "http";

/// Lifecycle class of a registered service instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    /// Ephemeral registration that goes away with the registering session.
    #[serde(rename = "DYNAMIC")]
    Dynamic,

    #[serde(rename = "STATIC")]
    Static,

    #[serde(rename = "PERMANENT")]
    Permanent,
}

impl Default for ServiceType {
    fn default() -> ServiceType {
        ServiceType::Dynamic
    }
}

/// Single element of a `UriSpec` template.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct UriPart {
    /// Literal text or, for variable parts, the name of an instance field.
    pub value: String,

    /// Resolve `value` as an instance field instead of copying it.
    #[serde(default)]
    pub variable: bool,
}

impl UriPart {
    pub fn literal<S: Into<String>>(value: S) -> UriPart {
        UriPart {
            value: value.into(),
            variable: false,
        }
    }

    pub fn variable<S: Into<String>>(field: S) -> UriPart {
        UriPart {
            value: field.into(),
            variable: true,
        }
    }
}

/// Template describing how to build an URI for a service instance.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct UriSpec {
    #[serde(default)]
    pub parts: Vec<UriPart>,
}

impl Default for UriSpec {
    /// The `{scheme}://{address}:{port}` template.
    fn default() -> UriSpec {
        UriSpec {
            parts: vec![
                UriPart::variable("scheme"),
                UriPart::literal("://"),
                UriPart::variable("address"),
                UriPart::literal(":"),
                UriPart::variable("port"),
            ],
        }
    }
}

impl UriSpec {
    /// Render the template against the fields of an instance.
    ///
    /// Variable parts naming a missing (or null) field resolve to `DEFAULT_SCHEME`.
    pub fn render(&self, instance: &ServiceInstance) -> String {
        let fields = serde_json::to_value(instance).unwrap_or(Value::Null);
        let mut uri = String::new();
        for part in &self.parts {
            if !part.variable {
                uri.push_str(&part.value);
                continue;
            }
            match fields.get(&part.value) {
                None | Some(Value::Null) => uri.push_str(DEFAULT_SCHEME),
                Some(Value::String(value)) => uri.push_str(value),
                Some(value) => uri.push_str(&value.to_string()),
            };
        }
        uri
    }
}

/// Advertised endpoint of a service, stored as the payload of its registration node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    /// Store assigned identifier, empty until the instance is registered.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,

    #[serde(default = "ServiceInstance::default_scheme")]
    pub scheme: String,

    #[serde(default)]
    pub ssl_port: Option<u16>,

    /// Opaque, user defined, data attached to the instance.
    #[serde(default)]
    pub payload: Option<Value>,

    /// Milliseconds since the UNIX epoch when the instance was registered.
    #[serde(default, rename = "registrationTimeUTC")]
    pub registration_time_utc: i64,

    #[serde(default)]
    pub service_type: ServiceType,

    #[serde(default)]
    pub uri_spec: UriSpec,
}

impl ServiceInstance {
    pub fn builder() -> ServiceInstanceBuilder {
        ServiceInstanceBuilder::default()
    }

    fn default_scheme() -> String {
        DEFAULT_SCHEME.into()
    }

    /// Render the instance's own URI template.
    pub fn uri(&self) -> String {
        self.uri_spec.render(self)
    }
}

/// Incrementally configure a `ServiceInstance`.
#[derive(Clone, Debug, Default)]
pub struct ServiceInstanceBuilder {
    address: Option<String>,
    name: Option<String>,
    payload: Option<Value>,
    port: u16,
    scheme: Option<String>,
    ssl_port: Option<u16>,
    uri_spec: Option<UriSpec>,
}

impl ServiceInstanceBuilder {
    pub fn address<S: Into<String>>(mut self, address: S) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn ssl_port(mut self, port: u16) -> Self {
        self.ssl_port = Some(port);
        self
    }

    pub fn uri_spec(mut self, uri_spec: UriSpec) -> Self {
        self.uri_spec = Some(uri_spec);
        self
    }

    pub fn build(self) -> ServiceInstance {
        ServiceInstance {
            id: String::new(),
            name: self.name.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            port: self.port,
            scheme: self.scheme.unwrap_or_else(|| DEFAULT_SCHEME.into()),
            ssl_port: self.ssl_port,
            payload: self.payload,
            registration_time_utc: 0,
            service_type: ServiceType::Dynamic,
            uri_spec: self.uri_spec.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ServiceInstance;
    use super::ServiceType;
    use super::UriPart;
    use super::UriSpec;

    fn instance() -> ServiceInstance {
        ServiceInstance::builder()
            .name("svc/v1")
            .address("localhost")
            .port(12345)
            .build()
    }

    #[test]
    fn default_template_renders_scheme_address_port() {
        assert_eq!(instance().uri(), "http://localhost:12345");
    }

    #[test]
    fn custom_scheme_and_literals() {
        let spec = UriSpec {
            parts: vec![
                UriPart::variable("scheme"),
                UriPart::literal("://"),
                UriPart::variable("address"),
                UriPart::literal(":"),
                UriPart::variable("sslPort"),
                UriPart::literal("/api"),
            ],
        };
        let instance = ServiceInstance::builder()
            .address("10.0.0.1")
            .scheme("https")
            .ssl_port(8443)
            .uri_spec(spec)
            .build();
        assert_eq!(instance.uri(), "https://10.0.0.1:8443/api");
    }

    #[test]
    fn unknown_and_null_fields_fall_back_to_scheme() {
        let spec = UriSpec {
            parts: vec![UriPart::variable("protocol"), UriPart::variable("sslPort")],
        };
        assert_eq!(spec.render(&instance()), "httphttp");
    }

    #[test]
    fn serialised_field_names() {
        let mut instance = instance();
        instance.id = "abc".into();
        instance.registration_time_utc = 42;
        let value = serde_json::to_value(&instance).unwrap();
        assert_eq!(value["id"], json!("abc"));
        assert_eq!(value["sslPort"], json!(null));
        assert_eq!(value["payload"], json!(null));
        assert_eq!(value["registrationTimeUTC"], json!(42));
        assert_eq!(value["serviceType"], json!("DYNAMIC"));
        assert_eq!(
            value["uriSpec"]["parts"][0],
            json!({"value": "scheme", "variable": true})
        );
    }

    #[test]
    fn decode_minimal_record() {
        let instance: ServiceInstance = serde_json::from_str(
            r#"{"name": "svc/v2", "address": "example.com", "port": 80}"#,
        )
        .unwrap();
        assert_eq!(instance.scheme, "http");
        assert_eq!(instance.service_type, ServiceType::Dynamic);
        assert_eq!(instance.uri(), "http://example.com:80");
    }
}
