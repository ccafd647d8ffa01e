//! Data Types
//!
//! Parameter types attached to workflow inputs/outputs and tool ports.
//! File-like types carry secondary-file suffix patterns, which the
//! reconciliation pass unifies across connections.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A file type: an optional subtype name plus secondary-file patterns.
///
/// Patterns either append (`.bai`) or replace the extension (`^.bai`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct FileType {
    /// Subtype name such as `BamBai`; `None` for a generic File
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Secondary-file suffix patterns, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondaries: Vec<String>,
}

impl FileType {
    /// A generic File with no secondaries.
    pub fn generic() -> Self {
        Self::default()
    }

    /// A named file subtype with the given secondary patterns.
    pub fn named(name: impl Into<String>, secondaries: &[&str]) -> Self {
        Self {
            name: Some(name.into()),
            secondaries: secondaries.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Returns true if no subtype name is defined.
    pub fn is_generic(&self) -> bool {
        self.name.is_none()
    }

    /// Caret-normalized, order-independent suffix set.
    pub fn signature(&self) -> Signature {
        Signature(
            self.secondaries
                .iter()
                .map(|s| s.trim_start_matches('^').to_string())
                .collect(),
        )
    }
}

/// Normalized set of secondary-file suffixes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Signature(BTreeSet<String>);

impl Signature {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset(&self, other: &Signature) -> bool {
        self.0.is_subset(&other.0)
    }

    /// True if `self` contains every suffix of `other` and at least one more.
    pub fn is_strict_superset(&self, other: &Signature) -> bool {
        self.0.is_superset(&other.0) && self.0.len() > other.0.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.0.iter().map(String::as_str).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// The shape of a data type, without its optionality.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    String,
    Int,
    Float,
    Boolean,
    Directory,
    /// A generated output file name
    Filename,
    /// Generic / untyped value
    Any,
    File(FileType),
    Array(Box<DataType>),
}

/// A parameter type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataType {
    pub kind: TypeKind,

    #[serde(default)]
    pub optional: bool,
}

impl DataType {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            optional: false,
        }
    }

    pub fn string() -> Self {
        Self::new(TypeKind::String)
    }

    pub fn int() -> Self {
        Self::new(TypeKind::Int)
    }

    pub fn float() -> Self {
        Self::new(TypeKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(TypeKind::Boolean)
    }

    pub fn directory() -> Self {
        Self::new(TypeKind::Directory)
    }

    pub fn filename() -> Self {
        Self::new(TypeKind::Filename)
    }

    pub fn any() -> Self {
        Self::new(TypeKind::Any)
    }

    /// A generic File.
    pub fn file() -> Self {
        Self::new(TypeKind::File(FileType::generic()))
    }

    /// A File carrying secondary files.
    ///
    /// ```
    /// use wfbridge::workflow::DataType;
    ///
    /// let bam = DataType::file_with(Some("BamBai"), &[".bai"]);
    /// assert!(bam.is_file_like());
    /// ```
    pub fn file_with(name: Option<&str>, secondaries: &[&str]) -> Self {
        Self::new(TypeKind::File(FileType {
            name: name.map(str::to_string),
            secondaries: secondaries.iter().map(|s| s.to_string()).collect(),
        }))
    }

    pub fn array(inner: DataType) -> Self {
        Self::new(TypeKind::Array(Box::new(inner)))
    }

    /// Returns this type marked optional.
    pub fn into_optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// True for File and (nested) arrays of File.
    pub fn is_file_like(&self) -> bool {
        self.file_type().is_some()
    }

    pub fn is_filename(&self) -> bool {
        matches!(self.kind, TypeKind::Filename)
    }

    /// The innermost file type, looking through arrays.
    pub fn file_type(&self) -> Option<&FileType> {
        match &self.kind {
            TypeKind::File(file) => Some(file),
            TypeKind::Array(inner) => inner.file_type(),
            _ => None,
        }
    }

    fn file_type_mut(&mut self) -> Option<&mut FileType> {
        match &mut self.kind {
            TypeKind::File(file) => Some(file),
            TypeKind::Array(inner) => inner.file_type_mut(),
            _ => None,
        }
    }

    /// Secondary-file signature, if file-like.
    pub fn signature(&self) -> Option<Signature> {
        self.file_type().map(FileType::signature)
    }

    /// Replaces the innermost file type, keeping array nesting and every
    /// `optional` flag. Returns false if this type is not file-like.
    pub fn adopt_file_type(&mut self, file: &FileType) -> bool {
        match self.file_type_mut() {
            Some(current) => {
                *current = file.clone();
                true
            }
            None => false,
        }
    }

    /// Name used when suffixing identifiers, e.g. `File`, `BamBai`, `Int`.
    pub fn type_name(&self) -> String {
        match &self.kind {
            TypeKind::String => "String".to_string(),
            TypeKind::Int => "Int".to_string(),
            TypeKind::Float => "Float".to_string(),
            TypeKind::Boolean => "Boolean".to_string(),
            TypeKind::Directory => "Directory".to_string(),
            TypeKind::Filename => "Filename".to_string(),
            TypeKind::Any => "Any".to_string(),
            TypeKind::File(file) => file.name.clone().unwrap_or_else(|| "File".to_string()),
            TypeKind::Array(inner) => inner.type_name(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Array(inner) => write!(f, "Array<{}>", inner)?,
            TypeKind::File(file) if !file.secondaries.is_empty() => {
                write!(f, "{}{}", self.type_name(), file.signature())?
            }
            _ => write!(f, "{}", self.type_name())?,
        }
        if self.optional {
            write!(f, "?")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_caret_and_order() {
        let a = FileType::named("BamBai", &["^.bai", ".md5"]);
        let b = FileType::named("Other", &[".md5", ".bai"]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_subset() {
        let small = DataType::file_with(None, &[".bai"]).signature().unwrap();
        let large = DataType::file_with(None, &[".bai", ".crai"]).signature().unwrap();
        assert!(small.is_subset(&large));
        assert!(large.is_strict_superset(&small));
        assert!(!small.is_strict_superset(&small));
    }

    #[test]
    fn test_array_of_file_is_file_like() {
        let reads = DataType::array(DataType::file_with(None, &[".fai"]));
        assert!(reads.is_file_like());
        assert_eq!(reads.type_name(), "File");
        assert!(!DataType::string().is_file_like());
    }

    #[test]
    fn test_adopt_keeps_nesting_and_optional() {
        let mut target = DataType::array(DataType::file().into_optional()).into_optional();
        assert!(target.adopt_file_type(&FileType::named("BamBai", &[".bai"])));

        assert!(target.optional);
        match &target.kind {
            TypeKind::Array(inner) => {
                assert!(inner.optional);
                assert_eq!(inner.type_name(), "BamBai");
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_adopt_on_non_file_is_noop() {
        let mut target = DataType::int();
        assert!(!target.adopt_file_type(&FileType::generic()));
        assert_eq!(target, DataType::int());
    }

    #[test]
    fn test_display() {
        let bam = DataType::file_with(Some("BamBai"), &[".bai"]).into_optional();
        assert_eq!(bam.to_string(), "BamBai[.bai]?");
        assert_eq!(DataType::array(DataType::int()).to_string(), "Array<Int>");
    }

    #[test]
    fn test_serde_shape() {
        let bam = DataType::file_with(Some("BamBai"), &[".bai"]);
        let json = serde_json::to_value(&bam).unwrap();
        assert_eq!(json["kind"]["file"]["name"], "BamBai");
        assert_eq!(serde_json::to_value(DataType::int()).unwrap()["kind"], "int");
        let back: DataType = serde_json::from_value(json).unwrap();
        assert_eq!(back, bam);
    }
}
