#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XmlProcessorError {
    Syntax(SyntaxError),
    Unsupported(UnsupportedFeature),
    ExceededMaxBookmarks,
}
impl std::error::Error for XmlProcessorError {}
impl std::fmt::Display for XmlProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XmlProcessorError::Syntax(e) => write!(f, "syntax: {}", Into::<&str>::into(e)),
            XmlProcessorError::Unsupported(e) => {
                write!(f, "unsupported: {}", Into::<&str>::into(e))
            }
            XmlProcessorError::ExceededMaxBookmarks => f.write_str("exceeded-max-bookmarks"),
        }
    }
}
impl From<XmlProcessorError> for &str {
    fn from(val: XmlProcessorError) -> Self {
        match val {
            XmlProcessorError::Syntax(_) => "syntax",
            XmlProcessorError::Unsupported(_) => "unsupported",
            XmlProcessorError::ExceededMaxBookmarks => "exceeded-max-bookmarks",
        }
    }
}
impl From<&XmlProcessorError> for &str {
    fn from(val: &XmlProcessorError) -> Self {
        Into::<&str>::into(*val)
    }
}

/// Ways a document can violate the grammar or well-formedness rules of
/// XML 1.0. Any of these is fatal for the parse; the processor cannot
/// recover structure past the offending byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntaxError {
    ByteOrderMark,
    IncompleteSyntax,
    InvalidCharacterReference,
    InvalidUtf8,
    MalformedComment,
    MalformedDoctype,
    MalformedMarkupDeclaration,
    MalformedProcessingInstruction,
    MalformedXmlDeclaration,
    MalformedTagName,
    MalformedAttributeName,
    MissingAttributeValue,
    UnquotedAttributeValue,
    LessThanInAttributeValue,
    DuplicateAttribute,
    MalformedClosingTag,
    UnmatchedClosingTag,
    UndeclaredNamespacePrefix,
    ReservedNamespacePrefix,
    TextContentOutsideRootElement,
    CdataOutsideRootElement,
    DoctypeOutsideProlog,
    SecondDoctype,
    SecondRootElement,
    NoRootElement,
    UnclosedElements,
}
impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}
impl From<SyntaxError> for &str {
    fn from(val: SyntaxError) -> Self {
        use SyntaxError as E;
        match val {
            E::ByteOrderMark => "A byte-order mark is not allowed at the start of the document.",
            E::IncompleteSyntax => "The input ended in the middle of a token.",
            E::InvalidCharacterReference => "Invalid or malformed character reference.",
            E::InvalidUtf8 => "Text content is not valid UTF-8.",
            E::MalformedComment => "A comment must not contain \"--\" or end with a dash.",
            E::MalformedDoctype => "Malformed DOCTYPE declaration.",
            E::MalformedMarkupDeclaration => "Markup declarations must open a comment, a CDATA section, or a DOCTYPE.",
            E::MalformedProcessingInstruction => "Malformed processing instruction.",
            E::MalformedXmlDeclaration => "Malformed XML declaration.",
            E::MalformedTagName => "Tag names must be valid XML Names with at most one namespace separator.",
            E::MalformedAttributeName => "Attribute names must be valid XML Names with at most one namespace separator.",
            E::MissingAttributeValue => "Every attribute must have a value.",
            E::UnquotedAttributeValue => "Attribute values must be quoted with \" or '.",
            E::LessThanInAttributeValue => "Attribute values must not contain a literal \"<\".",
            E::DuplicateAttribute => "An attribute appeared more than once on the same tag.",
            E::MalformedClosingTag => "A closing tag may only contain a tag name.",
            E::UnmatchedClosingTag => "A closing tag does not match the open element.",
            E::UndeclaredNamespacePrefix => "A namespace prefix was used without being declared.",
            E::ReservedNamespacePrefix => "The xml and xmlns prefixes cannot be redeclared.",
            E::TextContentOutsideRootElement => "Text content is only allowed inside the root element.",
            E::CdataOutsideRootElement => "CDATA sections are only allowed inside the root element.",
            E::DoctypeOutsideProlog => "A DOCTYPE declaration is only allowed in the document prolog.",
            E::SecondDoctype => "Only one DOCTYPE declaration is allowed per document.",
            E::SecondRootElement => "An XML document must have exactly one root element.",
            E::NoRootElement => "The document ended without a root element.",
            E::UnclosedElements => "The document ended with unclosed elements.",
        }
    }
}
impl From<&SyntaxError> for &str {
    fn from(val: &SyntaxError) -> Self {
        Into::<&str>::into(*val)
    }
}

/// Syntax this processor recognizes but refuses to process. These mark
/// real XML the implementation has no support for, as opposed to
/// malformed input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnsupportedFeature {
    Utf16ByteOrderMark,
    XmlVersion,
    Encoding,
    StandaloneDeclaration,
    InternalDtdSubset,
    ProcessingInstructionTarget,
}
impl std::fmt::Display for UnsupportedFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}
impl From<UnsupportedFeature> for &str {
    fn from(val: UnsupportedFeature) -> Self {
        use UnsupportedFeature as E;
        match val {
            E::Utf16ByteOrderMark => "Cannot process UTF-16 documents.",
            E::XmlVersion => "Only XML 1.0 documents are supported.",
            E::Encoding => "Only UTF-8 encoded documents are supported.",
            E::StandaloneDeclaration => "Cannot process standalone=\"no\" documents.",
            E::InternalDtdSubset => "Cannot process internal DTD subsets.",
            E::ProcessingInstructionTarget => {
                "Cannot process instruction targets other than \"xml\"."
            }
        }
    }
}
impl From<&UnsupportedFeature> for &str {
    fn from(val: &UnsupportedFeature) -> Self {
        Into::<&str>::into(*val)
    }
}
