//! Name helpers shared by the filter and root selection.

/// Converts a dotted Java class name to the internal slash form.
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

/// Package of an internal class name, empty for the default package.
pub fn package_of(class_name: &str) -> &str {
    match class_name.rfind('/') {
        Some(pos) => &class_name[..pos],
        None => ""
    }
}

/// A class name pattern. `pkg.*` selects the classes of one package, `pkg.**` a package and
/// all its subpackages, `*` or `**` everything, and anything else one exact class. Dotted and
/// slashed names are both accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClassPattern {
    Any,
    Exact(String),
    Package(String),
    Subtree(String),
}

impl ClassPattern {
    pub fn parse(pattern: &str) -> ClassPattern {
        let pattern = internal_name(pattern.trim());
        if pattern == "*" || pattern == "**" {
            ClassPattern::Any
        } else if let Some(prefix) = pattern.strip_suffix("/**") {
            ClassPattern::Subtree(prefix.to_owned())
        } else if let Some(prefix) = pattern.strip_suffix("/*") {
            ClassPattern::Package(prefix.to_owned())
        } else {
            ClassPattern::Exact(pattern)
        }
    }

    pub fn matches(&self, class_name: &str) -> bool {
        match self {
            ClassPattern::Any => true,
            ClassPattern::Exact(name) => name == class_name,
            ClassPattern::Package(pkg) => package_of(class_name) == pkg,
            ClassPattern::Subtree(pkg) => {
                class_name.len() > pkg.len()
                    && class_name.starts_with(pkg.as_str())
                    && class_name.as_bytes()[pkg.len()] == b'/'
            }
        }
    }
}

/// `*` matches any name, anything else exactly.
pub fn wildcard_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns() {
        assert!(ClassPattern::parse("java.lang.*").matches("java/lang/String"));
        assert!(!ClassPattern::parse("java.lang.*").matches("java/lang/reflect/Method"));
        assert!(ClassPattern::parse("java.**").matches("java/lang/reflect/Method"));
        assert!(!ClassPattern::parse("java.**").matches("javax/swing/JFrame"));
        assert!(ClassPattern::parse("a.B").matches("a/B"));
        assert!(ClassPattern::parse("*").matches("Anything"));
    }

    #[test]
    fn test_default_package() {
        assert_eq!(package_of("Main"), "");
        assert_eq!(package_of("a/b/C"), "a/b");
    }
}
