use super::{
    Browser, DuplicateBehavior, GenericHeader, HeaderError, HeaderRegistry, TypedHeader,
};

#[derive(Debug)]
pub struct HeaderRecord {
    name: String,
    raw_values: Vec<String>,
    typed: Box<dyn TypedHeader>,
}

impl HeaderRecord {
    /// Name as it appeared on the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First raw value.
    pub fn value(&self) -> &str {
        self.raw_values.first().map(String::as_str).unwrap_or("")
    }

    /// Every raw value folded into this record, in arrival order.
    pub fn raw_values(&self) -> &[String] {
        &self.raw_values
    }

    pub fn typed(&self) -> &dyn TypedHeader {
        self.typed.as_ref()
    }

    pub fn duplicate_behavior(&self) -> DuplicateBehavior {
        self.typed.duplicate_behavior()
    }

    fn is_generic(&self) -> bool {
        self.typed.as_any().is::<GenericHeader>()
    }
}

/// Ordered header collection with per-type duplicate handling.
#[derive(Debug, Default)]
pub struct HeaderMap {
    records: Vec<HeaderRecord>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderRecord> {
        self.records.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn record(&self, name: &str) -> Option<&HeaderRecord> {
        self.position(name).map(|index| &self.records[index])
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.record(name).map(HeaderRecord::value)
    }

    /// Raw values for `name` across every record.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.records
            .iter()
            .filter(|record| record.name.eq_ignore_ascii_case(name))
            .flat_map(|record| record.raw_values.iter().map(String::as_str))
            .collect()
    }

    pub fn typed<T: TypedHeader + 'static>(&self) -> Option<&T> {
        self.records
            .iter()
            .find_map(|record| record.typed.as_any().downcast_ref::<T>())
    }

    /// Parses `value` through the registered type for `name` and applies its duplicate policy.
    pub fn insert(
        &mut self,
        registry: &HeaderRegistry,
        name: &str,
        value: &str,
    ) -> Result<(), HeaderError> {
        let Some(index) = self.position(name) else {
            self.push(registry, name, value)?;
            return Ok(());
        };

        let existing = &mut self.records[index];
        match existing.typed.duplicate_behavior() {
            DuplicateBehavior::Error => Err(HeaderError::Duplicate(existing.name.clone())),
            DuplicateBehavior::Replace => {
                let mut typed = registry.create(name);
                typed.parse(value)?;
                existing.typed = typed;
                existing.raw_values = vec![value.to_string()];
                Ok(())
            }
            DuplicateBehavior::Append if existing.is_generic() => {
                self.push(registry, name, value)?;
                Ok(())
            }
            DuplicateBehavior::Append | DuplicateBehavior::Merge => {
                existing.typed.parse(value)?;
                existing.raw_values.push(value.to_string());
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.records.len();
        self.records
            .retain(|record| !record.name.eq_ignore_ascii_case(name));
        before - self.records.len()
    }

    /// `Name: value\r\n` lines built for `browser`.
    pub fn to_wire(&self, browser: Browser) -> String {
        let mut wire = String::new();
        for record in &self.records {
            wire.push_str(&record.name);
            wire.push_str(": ");
            wire.push_str(&record.typed.build(browser));
            wire.push_str("\r\n");
        }
        wire
    }

    fn push(
        &mut self,
        registry: &HeaderRegistry,
        name: &str,
        value: &str,
    ) -> Result<(), HeaderError> {
        let mut typed = registry.create(name);
        typed.parse(value)?;
        self.records.push(HeaderRecord {
            name: name.to_string(),
            raw_values: vec![value.to_string()],
            typed,
        });
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.name.eq_ignore_ascii_case(name))
    }
}
