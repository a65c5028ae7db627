// src/gps/classifier.rs
//! Folds decoded sentences into a working position/fix draft
//!
//! The latest sentence wins for every field it carries. Fields a sentence does
//! not carry keep whatever an earlier sentence put there.

use super::{
    data::{FixQuality, FixState, Position},
    nmea::{RawSentence, SentenceType},
};

/// Working copy of the position and fix state, updated sentence by sentence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixDraft {
    pub position: Position,
    pub fix: FixState,
}

/// What a sentence did to the draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Updated,
    /// Recognised but carries nothing the draft tracks
    Ignored,
}

/// Apply one sentence to the draft
pub fn classify(sentence: &RawSentence, draft: &mut FixDraft) -> Classification {
    match sentence.sentence_type {
        SentenceType::Gga => apply_gga(sentence, draft),
        SentenceType::Rmc => apply_rmc(sentence, draft),
        SentenceType::Gsa => apply_gsa(sentence, draft),
        SentenceType::Gst => apply_gst(sentence, draft),
        _ => return Classification::Ignored,
    }
    Classification::Updated
}

/// GGA: position, fix quality, satellites, HDOP and altitude
fn apply_gga(sentence: &RawSentence, draft: &mut FixDraft) {
    let position = &mut draft.position;
    position.latitude = sentence.coordinate(1, 2);
    position.longitude = sentence.coordinate(3, 4);
    position.fix_quality = sentence.u8_field(5).and_then(FixQuality::from_code);
    position.satellites_used = sentence.u8_field(6);
    position.hdop = sentence.f64_field(7);
    position.elevation = sentence.f64_field(8);

    match position.fix_quality {
        Some(quality) => {
            position.valid = position.has_coordinates() && quality.is_fix();
            draft.fix.set_rtk(quality);
        }
        None => {
            position.valid = false;
            draft.fix.clear_rtk();
        }
    }
}

/// RMC: status and position. RTK flags are only touched when the fix is lost.
fn apply_rmc(sentence: &RawSentence, draft: &mut FixDraft) {
    let position = &mut draft.position;
    position.latitude = sentence.coordinate(2, 3);
    position.longitude = sentence.coordinate(4, 5);

    if sentence.field(1) == Some("A") {
        position.valid = position.has_coordinates();
    } else {
        position.valid = false;
        draft.fix.clear_rtk();
    }
}

/// GSA: dilution of precision
fn apply_gsa(sentence: &RawSentence, draft: &mut FixDraft) {
    let position = &mut draft.position;
    position.pdop = sentence.f64_field(14);
    position.hdop = sentence.f64_field(15);
    position.vdop = sentence.f64_field(16);
}

/// GST: pseudorange error statistics. Horizontal accuracy combines the
/// latitude and longitude sigmas.
fn apply_gst(sentence: &RawSentence, draft: &mut FixDraft) {
    let position = &mut draft.position;
    position.accuracy_horizontal = match (sentence.f64_field(5), sentence.f64_field(6)) {
        (Some(lat), Some(lon)) => Some(lat.hypot(lon)),
        _ => None,
    };
    position.accuracy_vertical = sentence.f64_field(7);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::nmea::{decode, format_sentence};

    fn gga(quality: &str) -> RawSentence {
        let body = format!(
            "GNGGA,120000.00,4012.0,N,07401.0,W,{},10,0.9,50.0,M,-33.2,M,1.2,0000",
            quality
        );
        decode(&format_sentence(&body)).unwrap()
    }

    #[test]
    fn test_rtk_fixed() {
        let mut draft = FixDraft::default();
        assert_eq!(classify(&gga("4"), &mut draft), Classification::Updated);
        assert!(draft.fix.rtk_fixed);
        assert!(!draft.fix.rtk_float);
        assert!(draft.position.valid);
        assert_eq!(draft.position.fix_quality, Some(FixQuality::RtkFixed));
    }

    #[test]
    fn test_rtk_float() {
        let mut draft = FixDraft::default();
        classify(&gga("5"), &mut draft);
        assert!(!draft.fix.rtk_fixed);
        assert!(draft.fix.rtk_float);
        assert!(draft.position.valid);
    }

    #[test]
    fn test_standard_fixes() {
        for code in ["1", "2"] {
            let mut draft = FixDraft::default();
            classify(&gga(code), &mut draft);
            assert!(draft.position.valid);
            assert!(!draft.fix.rtk_fixed && !draft.fix.rtk_float);
        }
    }

    #[test]
    fn test_no_fix() {
        let mut draft = FixDraft::default();
        classify(&gga("4"), &mut draft);
        classify(&gga("0"), &mut draft);
        assert!(!draft.position.valid);
        assert!(!draft.fix.rtk_fixed && !draft.fix.rtk_float);
    }

    #[test]
    fn test_missing_elevation_is_unknown() {
        let line = format_sentence("GNGGA,120000.00,4012.0,N,07401.0,W,4,10,,,M,,M,,");
        let mut draft = FixDraft::default();
        classify(&decode(&line).unwrap(), &mut draft);
        assert!(draft.position.valid);
        assert_eq!(draft.position.elevation, None);
        assert_eq!(draft.position.hdop, None);
    }

    #[test]
    fn test_later_sentence_keeps_fields_it_does_not_carry() {
        let mut draft = FixDraft::default();
        classify(&gga("4"), &mut draft);

        let gsa = format_sentence("GNGSA,A,3,01,02,03,04,05,06,07,08,09,10,11,12,1.2,0.8,0.9,1");
        classify(&decode(&gsa).unwrap(), &mut draft);
        assert_eq!(draft.position.pdop, Some(1.2));
        assert_eq!(draft.position.hdop, Some(0.8));
        assert_eq!(draft.position.vdop, Some(0.9));
        // GSA carries no position or fix quality
        assert_eq!(draft.position.elevation, Some(50.0));
        assert!(draft.fix.rtk_fixed);

        let rmc = format_sentence("GNRMC,120001.00,A,4013.0,N,07402.0,W,0.0,0.0,150324,,,A");
        classify(&decode(&rmc).unwrap(), &mut draft);
        assert!((draft.position.latitude.unwrap() - (40.0 + 13.0 / 60.0)).abs() < 1e-9);
        assert_eq!(draft.position.satellites_used, Some(10));
        assert!(draft.position.valid);
        assert!(draft.fix.rtk_fixed);
    }

    #[test]
    fn test_gst_sets_accuracy() {
        let mut draft = FixDraft::default();
        classify(&gga("4"), &mut draft);

        let gst = format_sentence("GNGST,120000.00,0.8,0.02,0.01,45.0,0.012,0.016,0.025");
        assert_eq!(classify(&decode(&gst).unwrap(), &mut draft), Classification::Updated);
        assert!((draft.position.accuracy_horizontal.unwrap() - 0.02).abs() < 1e-9);
        assert_eq!(draft.position.accuracy_vertical, Some(0.025));
        assert!(draft.fix.rtk_fixed);
        assert_eq!(draft.position.hdop, Some(0.9));

        let partial = format_sentence("GNGST,120001.00,0.8,,,,0.012,,");
        classify(&decode(&partial).unwrap(), &mut draft);
        assert_eq!(draft.position.accuracy_horizontal, None);
        assert_eq!(draft.position.accuracy_vertical, None);
    }

    #[test]
    fn test_rmc_void_invalidates() {
        let mut draft = FixDraft::default();
        classify(&gga("5"), &mut draft);
        let rmc = format_sentence("GNRMC,120001.00,V,,,,,,,150324,,,N");
        classify(&decode(&rmc).unwrap(), &mut draft);
        assert!(!draft.position.valid);
        assert!(!draft.fix.rtk_float);
    }

    #[test]
    fn test_supported_but_unused_types_are_ignored() {
        let mut draft = FixDraft::default();
        let vtg = decode(&format_sentence("GNVTG,0.0,T,0.0,M,0.0,N,0.0,K,A")).unwrap();
        assert_eq!(classify(&vtg, &mut draft), Classification::Ignored);
        assert_eq!(draft, FixDraft::default());
    }
}
