pub mod step1; // Regions, venues, cups from the month bundle
pub mod step2; // Schedules, races, initial ledger rows per cup
pub mod step3; // Entries, players, line prediction per race
pub mod step4; // Odds snapshot replacement + odds_status event
pub mod step5; // Results, payouts, lap positions per race

pub use step1::Step1Saver;
pub use step2::Step2Saver;
pub use step3::Step3Saver;
pub use step4::Step4Saver;
pub use step5::Step5Saver;
