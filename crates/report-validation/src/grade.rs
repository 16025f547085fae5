use std::fmt;

use serde::{Deserialize, Serialize};

/// Letter grade on the 100-point institutional rubric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LetterGrade {
    F,
    D,
    CMinus,
    C,
    CPlus,
    BMinus,
    B,
    BPlus,
    AMinus,
    A,
    APlus,
}

impl LetterGrade {
    pub fn from_points(points: f64) -> Self {
        match points {
            p if p >= 97.0 => LetterGrade::APlus,
            p if p >= 93.0 => LetterGrade::A,
            p if p >= 90.0 => LetterGrade::AMinus,
            p if p >= 87.0 => LetterGrade::BPlus,
            p if p >= 83.0 => LetterGrade::B,
            p if p >= 80.0 => LetterGrade::BMinus,
            p if p >= 77.0 => LetterGrade::CPlus,
            p if p >= 73.0 => LetterGrade::C,
            p if p >= 70.0 => LetterGrade::CMinus,
            p if p >= 60.0 => LetterGrade::D,
            _ => LetterGrade::F,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::APlus => "A+",
            LetterGrade::A => "A",
            LetterGrade::AMinus => "A-",
            LetterGrade::BPlus => "B+",
            LetterGrade::B => "B",
            LetterGrade::BMinus => "B-",
            LetterGrade::CPlus => "C+",
            LetterGrade::C => "C",
            LetterGrade::CMinus => "C-",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_map_to_grades() {
        assert_eq!(LetterGrade::from_points(98.0), LetterGrade::APlus);
        assert_eq!(LetterGrade::from_points(85.0), LetterGrade::B);
        assert_eq!(LetterGrade::from_points(71.0), LetterGrade::CMinus);
        assert_eq!(LetterGrade::from_points(30.0), LetterGrade::F);
    }

    #[test]
    fn grades_order_for_capping() {
        assert!(LetterGrade::APlus > LetterGrade::B);
        assert!(LetterGrade::B > LetterGrade::CMinus);
        // A cap at B keeps lower grades untouched.
        assert_eq!(LetterGrade::CPlus.min(LetterGrade::B), LetterGrade::CPlus);
        assert_eq!(LetterGrade::A.min(LetterGrade::B), LetterGrade::B);
    }
}
