use crate::policy::Planned;
use crate::repository::ClassRecord;

/// Brackets one range of source lines with region entry and exit calls. Every method of the
/// region's class with code on those lines is instrumented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRegionPolicy {
    class_name: String,
    start_line: u16,
    end_line: u16,
}

impl CodeRegionPolicy {
    pub fn new(class_name: &str, start_line: u16, end_line: u16) -> CodeRegionPolicy {
        CodeRegionPolicy { class_name: class_name.to_owned(), start_line, end_line }
    }

    pub fn class_loaded(&mut self, record: &mut ClassRecord) -> bool {
        if record.name != self.class_name {
            return false;
        }
        let mut changed = false;
        for i in 0..record.methods.len() {
            let covers = match record.original_code(i) {
                Ok(Some(code)) => {
                    code.line_numbers()
                        .any(|l| l.line_number >= self.start_line && l.line_number <= self.end_line)
                },
                Ok(None) => false,
                Err(err) => {
                    let signature = record.methods[i].signature();
                    error!("scan of {}.{} failed: {}", record.name, signature, err);
                    record.methods[i].flags.unscannable = true;
                    false
                }
            };
            if covers {
                debug!("code region {}..={} found in {}.{}",
                       self.start_line, self.end_line, record.name, record.methods[i].signature());
                record.methods[i].flags.instrumented = true;
                changed = true;
            }
        }
        if !changed {
            warn!("no code for lines {}..={} in {}", self.start_line, self.end_line, record.name);
        }
        changed
    }

    pub fn plan(&self, record: &ClassRecord, index: usize) -> Vec<Planned> {
        if record.name == self.class_name && record.methods[index].flags.instrumented {
            vec![Planned::CodeRegion { start_line: self.start_line, end_line: self.end_line }]
        } else {
            vec![]
        }
    }
}
