use dexshrink_model::{ClassRef, DexClass, ItemFactory, ServiceMapping};

use crate::diagnostics::{Diagnostic, Reporter};

/// Conventional resource directory listing service implementations.
pub const SERVICES_PREFIX: &str = "META-INF/services/";

/// A non-class resource entry of the program inputs.
#[derive(Debug, Clone)]
pub struct DataEntry {
    /// Archive-relative name, e.g. `META-INF/services/com.example.Spi`.
    pub name: String,
    pub bytes: Vec<u8>,
    /// Feature split the entry ships in, `None` for the base.
    pub feature: Option<String>,
}

/// The opaque reader interface the core consumes.
///
/// Concrete classfile and Dex readers live outside this workspace; they
/// lower their formats into [`DexClass`] values and resource entries. The
/// core neither parses nor serializes container formats.
pub trait AppReader {
    fn each_program_class(&self, visitor: &mut dyn FnMut(DexClass));
    fn each_classpath_class(&self, visitor: &mut dyn FnMut(DexClass));
    fn each_library_class(&self, visitor: &mut dyn FnMut(DexClass));
    fn each_data_entry(&self, visitor: &mut dyn FnMut(&DataEntry));
}

/// A reader over already-materialized collections, used by tests and by
/// front ends that assemble inputs in memory.
#[derive(Default)]
pub struct CollectionReader {
    pub program: Vec<DexClass>,
    pub classpath: Vec<DexClass>,
    pub library: Vec<DexClass>,
    pub data_entries: Vec<DataEntry>,
}

impl AppReader for CollectionReader {
    fn each_program_class(&self, visitor: &mut dyn FnMut(DexClass)) {
        for class in &self.program {
            visitor(class.clone());
        }
    }

    fn each_classpath_class(&self, visitor: &mut dyn FnMut(DexClass)) {
        for class in &self.classpath {
            visitor(class.clone());
        }
    }

    fn each_library_class(&self, visitor: &mut dyn FnMut(DexClass)) {
        for class in &self.library {
            visitor(class.clone());
        }
    }

    fn each_data_entry(&self, visitor: &mut dyn FnMut(&DataEntry)) {
        for entry in &self.data_entries {
            visitor(entry);
        }
    }
}

/// Collects all classes from a reader, preserving declaration order.
pub fn read_classes(reader: &dyn AppReader) -> Vec<ClassRef> {
    let mut classes: Vec<ClassRef> = Vec::new();
    reader.each_program_class(&mut |class| classes.push(std::sync::Arc::new(class)));
    reader.each_classpath_class(&mut |class| classes.push(std::sync::Arc::new(class)));
    reader.each_library_class(&mut |class| classes.push(std::sync::Arc::new(class)));
    classes
}

/// Decodes `META-INF/services/` entries into the service mapping.
///
/// Entries are UTF-8; lines are trimmed, `#` starts a comment, blank lines
/// are ignored, and the remaining lines must be fully-qualified class names.
pub fn decode_services(
    reader: &dyn AppReader,
    factory: &ItemFactory,
    reporter: &mut Reporter,
) -> ServiceMapping {
    let mut mapping = ServiceMapping::new();
    reader.each_data_entry(&mut |entry| {
        let Some(interface_name) = entry.name.strip_prefix(SERVICES_PREFIX) else {
            return;
        };
        let Ok(text) = std::str::from_utf8(&entry.bytes) else {
            reporter.report(Diagnostic::warning(
                entry.name.clone(),
                "service entry is not valid UTF-8",
            ));
            return;
        };
        let Ok(interface) = factory.create_type(&binary_name_to_descriptor(interface_name)) else {
            reporter.report(Diagnostic::warning(
                entry.name.clone(),
                format!("'{interface_name}' is not a class name"),
            ));
            return;
        };

        let mut implementations = Vec::new();
        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(position) => &raw_line[..position],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !is_valid_class_name(line) {
                reporter.report(Diagnostic::warning(
                    entry.name.clone(),
                    format!("'{line}' is not a class name"),
                ));
                continue;
            }
            match factory.create_type(&binary_name_to_descriptor(line)) {
                Ok(implementation) => implementations.push(implementation),
                Err(_) => reporter.report(Diagnostic::warning(
                    entry.name.clone(),
                    format!("'{line}' is not a class name"),
                )),
            }
        }
        if !implementations.is_empty() {
            mapping.add_entry(interface, entry.feature.clone(), implementations);
        }
    });
    mapping
}

fn binary_name_to_descriptor(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '$'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_service_entries_with_comments() {
        let factory = ItemFactory::new();
        let reader = CollectionReader {
            data_entries: vec![DataEntry {
                name: format!("{SERVICES_PREFIX}com.example.Spi"),
                bytes: b"# providers\ncom.example.Impl1\n\n  com.example.Impl2  # trailing\n"
                    .to_vec(),
                feature: None,
            }],
            ..CollectionReader::default()
        };

        let mut reporter = Reporter::new();
        let mapping = decode_services(&reader, &factory, &mut reporter);
        let interface = factory.create_type("Lcom/example/Spi;").unwrap();
        let implementations = mapping.implementations_for(&interface);
        assert_eq!(implementations.len(), 2);
        assert!(!reporter.has_errors());
    }

    #[test]
    fn invalid_lines_are_warned_and_skipped() {
        let factory = ItemFactory::new();
        let reader = CollectionReader {
            data_entries: vec![DataEntry {
                name: format!("{SERVICES_PREFIX}com.example.Spi"),
                bytes: b"not a//class\ncom.example.Ok\n".to_vec(),
                feature: None,
            }],
            ..CollectionReader::default()
        };

        let mut reporter = Reporter::new();
        let mapping = decode_services(&reader, &factory, &mut reporter);
        let interface = factory.create_type("Lcom/example/Spi;").unwrap();
        assert_eq!(mapping.implementations_for(&interface).len(), 1);
        assert_eq!(reporter.sorted().len(), 1);
    }

    #[test]
    fn non_service_entries_are_ignored() {
        let factory = ItemFactory::new();
        let reader = CollectionReader {
            data_entries: vec![DataEntry {
                name: "assets/logo.png".to_owned(),
                bytes: vec![0xff],
                feature: None,
            }],
            ..CollectionReader::default()
        };
        let mut reporter = Reporter::new();
        let mapping = decode_services(&reader, &factory, &mut reporter);
        assert!(mapping.is_empty());
    }
}
