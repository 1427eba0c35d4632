//! Custom section removal.
//!
//! Custom sections carry no indices any other section refers to, so they can
//! be dropped without renumbering. Every non-custom section is copied
//! through verbatim, including its original size prefix.

use crate::codec::cursor::ByteCursor;
use crate::codec::sink::ByteSink;
use crate::codec::types::SectionKind;
use crate::codec::{MAGIC, VERSION};

use super::{Pass, PassError};

type KeepFn = Box<dyn Fn(&str) -> bool>;

pub struct CustomSectionStripper {
    keep: Option<KeepFn>,
}

impl CustomSectionStripper {
    /// Drops every custom section.
    pub fn new() -> CustomSectionStripper {
        CustomSectionStripper { keep: None }
    }

    /// Drops custom sections whose name the predicate rejects.
    pub fn keeping<F>(keep: F) -> CustomSectionStripper
    where
        F: Fn(&str) -> bool + 'static,
    {
        CustomSectionStripper {
            keep: Some(Box::new(keep)),
        }
    }

    fn keeps(&self, content: &[u8]) -> bool {
        let keep = match &self.keep {
            Some(keep) => keep,
            None => return false,
        };
        // the name cursor sees only the section content, so a declared name
        // length running past it is an EOF, not a read into the next section
        let mut name_cursor = ByteCursor::new(content);
        match name_cursor.read_string() {
            Ok(name) => keep(name),
            // a custom section without a well-formed name cannot match
            Err(_) => false,
        }
    }
}

impl Default for CustomSectionStripper {
    fn default() -> CustomSectionStripper {
        CustomSectionStripper::new()
    }
}

impl Pass for CustomSectionStripper {
    fn run(&mut self, input: &mut ByteCursor<'_>, output: &mut ByteSink) -> Result<(), PassError> {
        input.read_header()?;
        output.write_bytes(&MAGIC);
        output.write_bytes(&VERSION);

        while !input.is_at_end() {
            let section = input.read_section_info()?;
            let content = input.read(section.size)?;

            if section.kind != SectionKind::Custom || self.keeps(content) {
                output.write_bytes(&input.bytes()[section.range()]);
            }
            debug_assert_eq!(input.offset(), section.end());
        }
        Ok(())
    }
}
