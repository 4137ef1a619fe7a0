//! DIMSE status code categorization (PS3.7 Annex C).
//!
//! The status field returned by every DIMSE response is a 16-bit code.
//! Most of the code space is vendor- or service-specific; only a
//! handful of ranges and exact values are standardized. Categorization
//! here is total: every `u16` maps to exactly one [`StatusCategory`],
//! with anything outside the documented ranges treated as `Failure`.

/// The status field carried by a DIMSE response, together with its
/// categorization per PS3.7 Annex C.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct DimseStatus(pub u16);

/// The category a DIMSE status code falls into.
///
/// A terminal category (`Success`, `Warning`, `Failure`, `Cancel`) ends
/// the DIMSE exchange for a given message ID; `Pending` keeps the
/// association's operation open awaiting further responses.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StatusCategory {
    Success,
    Pending,
    Cancel,
    Warning,
    Failure,
}

impl DimseStatus {
    pub const SUCCESS: DimseStatus = DimseStatus(0x0000);
    pub const PENDING_MATCHES: DimseStatus = DimseStatus(0xFF00);
    pub const PENDING_WARNING: DimseStatus = DimseStatus(0xFF01);
    pub const CANCEL: DimseStatus = DimseStatus(0xFE00);
    pub const OUT_OF_RESOURCES: DimseStatus = DimseStatus(0xA700);
    pub const DATA_SET_SOP_CLASS_MISMATCH: DimseStatus = DimseStatus(0xA900);
    pub const CANNOT_UNDERSTAND: DimseStatus = DimseStatus(0xC000);
    pub const PROCESSING_FAILURE: DimseStatus = DimseStatus(0x0110);
    pub const SOP_CLASS_NOT_SUPPORTED: DimseStatus = DimseStatus(0x0122);
    pub const COERCION_OF_DATA_ELEMENTS: DimseStatus = DimseStatus(0xB000);
    pub const DATA_SET_DOES_NOT_MATCH_SOP_CLASS: DimseStatus = DimseStatus(0xB007);
    pub const REFUSED_OUT_OF_RESOURCES: DimseStatus = DimseStatus(0xA700);

    pub fn category(self) -> StatusCategory {
        match self.0 {
            0x0000 => StatusCategory::Success,
            0xFF00 | 0xFF01 => StatusCategory::Pending,
            0xFE00 => StatusCategory::Cancel,
            0xB000..=0xBFFF => StatusCategory::Warning,
            _ => StatusCategory::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self.category(), StatusCategory::Success)
    }

    pub fn is_pending(self) -> bool {
        matches!(self.category(), StatusCategory::Pending)
    }

    pub fn is_cancel(self) -> bool {
        matches!(self.category(), StatusCategory::Cancel)
    }

    pub fn is_warning(self) -> bool {
        matches!(self.category(), StatusCategory::Warning)
    }

    pub fn is_failure(self) -> bool {
        matches!(self.category(), StatusCategory::Failure)
    }

    /// Whether this status ends the DIMSE operation for its message ID
    /// (anything other than `Pending`).
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }
}

impl From<u16> for DimseStatus {
    fn from(value: u16) -> Self {
        DimseStatus(value)
    }
}

impl From<DimseStatus> for u16 {
    fn from(status: DimseStatus) -> Self {
        status.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x0000, StatusCategory::Success)]
    #[case(0xFF00, StatusCategory::Pending)]
    #[case(0xFF01, StatusCategory::Pending)]
    #[case(0xFE00, StatusCategory::Cancel)]
    #[case(0xB000, StatusCategory::Warning)]
    #[case(0xBFFF, StatusCategory::Warning)]
    #[case(0xB007, StatusCategory::Warning)]
    #[case(0xA700, StatusCategory::Failure)]
    #[case(0xC000, StatusCategory::Failure)]
    #[case(0x0110, StatusCategory::Failure)]
    #[case(0x1234, StatusCategory::Failure)]
    fn categorizes(#[case] code: u16, #[case] expected: StatusCategory) {
        assert_eq!(DimseStatus(code).category(), expected);
    }

    #[test]
    fn predicates_are_total_and_mutually_exclusive() {
        for code in 0..=u16::MAX {
            let status = DimseStatus(code);
            let count = [
                status.is_success(),
                status.is_pending(),
                status.is_cancel(),
                status.is_warning(),
                status.is_failure(),
            ]
            .into_iter()
            .filter(|b| *b)
            .count();
            assert_eq!(count, 1, "status {code:#06x} matched {count} predicates");
        }
    }

    #[test]
    fn terminal_excludes_only_pending() {
        assert!(!DimseStatus::PENDING_MATCHES.is_terminal());
        assert!(!DimseStatus::PENDING_WARNING.is_terminal());
        assert!(DimseStatus::SUCCESS.is_terminal());
        assert!(DimseStatus::CANCEL.is_terminal());
        assert!(DimseStatus::CANNOT_UNDERSTAND.is_terminal());
    }
}
