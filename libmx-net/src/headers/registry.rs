use std::collections::HashMap;

use super::{
    Accept, CacheControl, Connection, ContentDisposition, ContentEncoding, ContentLength,
    ContentType, GenericHeader, Host, SecWebSocketAccept, SecWebSocketKey, SecWebSocketVersion,
    TransferEncoding, TypedHeader, Upgrade,
};

pub type HeaderConstructor = fn() -> Box<dyn TypedHeader>;

/// Maps lowercase header names to constructors. Unknown names get a [`GenericHeader`].
#[derive(Debug, Clone, Default)]
pub struct HeaderRegistry {
    constructors: HashMap<String, HeaderConstructor>,
}

impl HeaderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("Content-Length", || Box::new(ContentLength::default()));
        registry.register("Transfer-Encoding", || Box::new(TransferEncoding::default()));
        registry.register("Content-Encoding", || Box::new(ContentEncoding::default()));
        registry.register("Content-Type", || Box::new(ContentType::default()));
        registry.register("Content-Disposition", || {
            Box::new(ContentDisposition::default())
        });
        registry.register("Connection", || Box::new(Connection::default()));
        registry.register("Upgrade", || Box::new(Upgrade::default()));
        registry.register("Host", || Box::new(Host::default()));
        registry.register("Accept", || Box::new(Accept::default()));
        registry.register("Cache-Control", || Box::new(CacheControl::default()));
        registry.register("Sec-WebSocket-Key", || Box::new(SecWebSocketKey::default()));
        registry.register("Sec-WebSocket-Version", || {
            Box::new(SecWebSocketVersion::default())
        });
        registry.register("Sec-WebSocket-Accept", || {
            Box::new(SecWebSocketAccept::default())
        });
        registry
    }

    pub fn register(&mut self, name: &str, constructor: HeaderConstructor) {
        self.constructors
            .insert(name.to_ascii_lowercase(), constructor);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }

    pub fn create(&self, name: &str) -> Box<dyn TypedHeader> {
        match self.constructors.get(&name.to_ascii_lowercase()) {
            Some(constructor) => constructor(),
            None => Box::new(GenericHeader::new(name)),
        }
    }
}
