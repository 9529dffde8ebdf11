//! Import name → distribution name resolution.

/// Well-known packages whose import name differs from the distribution name.
const KNOWN_DISTRIBUTIONS: &[(&str, &str)] = &[
    ("attr", "attrs"),
    ("bs4", "beautifulsoup4"),
    ("Crypto", "pycryptodome"),
    ("cv2", "opencv-python"),
    ("dateutil", "python-dateutil"),
    ("docx", "python-docx"),
    ("dotenv", "python-dotenv"),
    ("fitz", "PyMuPDF"),
    ("git", "GitPython"),
    ("jose", "python-jose"),
    ("jwt", "PyJWT"),
    ("kafka", "kafka-python"),
    ("ldap", "python-ldap"),
    ("magic", "python-magic"),
    ("multipart", "python-multipart"),
    ("MySQLdb", "mysqlclient"),
    ("nacl", "PyNaCl"),
    ("OpenSSL", "pyOpenSSL"),
    ("PIL", "Pillow"),
    ("pptx", "python-pptx"),
    ("serial", "pyserial"),
    ("skimage", "scikit-image"),
    ("sklearn", "scikit-learn"),
    ("slugify", "python-slugify"),
    ("socks", "PySocks"),
    ("telegram", "python-telegram-bot"),
    ("usb", "pyusb"),
    ("win32api", "pywin32"),
    ("yaml", "PyYAML"),
    ("zmq", "pyzmq"),
];

/// PEP 503 normalization: lowercase, runs of `-`, `_` and `.` collapse to `-`.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Distribution that provides the top-level import `root`.
pub fn distribution_for(root: &str) -> &str {
    KNOWN_DISTRIBUTIONS
        .iter()
        .find(|(import, _)| *import == root)
        .map(|(_, dist)| *dist)
        .unwrap_or(root)
}

/// Deny-list of distributions, pre-normalized.
#[derive(Debug, Clone, Default)]
pub struct PackageDenyList {
    entries: Vec<(String, String)>,
}

impl PackageDenyList {
    pub fn new(packages: &[String]) -> Self {
        let entries = packages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| (p.to_string(), normalize(p)))
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured entry matched by a dotted module name, by its top-level
    /// import root.
    pub fn matching(&self, module: &str) -> Option<&str> {
        let root = module.split('.').next().unwrap_or(module);
        if root.is_empty() {
            return None;
        }
        let by_distribution = normalize(distribution_for(root));
        let by_root = normalize(root);
        self.entries
            .iter()
            .find(|(_, normalized)| *normalized == by_distribution || *normalized == by_root)
            .map(|(original, _)| original.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("PyYAML"), "pyyaml");
        assert_eq!(normalize("python_dateutil"), "python-dateutil");
        assert_eq!(normalize("zope.interface"), "zope-interface");
        assert_eq!(normalize("a-_.b"), "a-b");
    }

    #[test]
    fn test_distribution_lookup() {
        assert_eq!(distribution_for("cv2"), "opencv-python");
        assert_eq!(distribution_for("requests"), "requests");
    }

    #[test]
    fn test_package_matching() {
        let deny = PackageDenyList::new(&["pyyaml".to_string(), "Requests".to_string()]);
        assert_eq!(deny.matching("yaml"), Some("pyyaml"));
        assert_eq!(deny.matching("requests.adapters"), Some("Requests"));
        assert_eq!(deny.matching("json"), None);

        let by_import_name = PackageDenyList::new(&["sklearn".to_string()]);
        assert_eq!(by_import_name.matching("sklearn.linear_model"), Some("sklearn"));
        let by_dist_name = PackageDenyList::new(&["scikit_learn".to_string()]);
        assert_eq!(by_dist_name.matching("sklearn"), Some("scikit_learn"));
    }
}
