// Recognises anti-bot interstitials and block pages in fetched content.

pub mod detectors;
