mod store;

pub use store::{
    clear_sweep_records, list_trial_results, load_sweep_summary, save_sweep_summary, save_trial_result, SUMMARY_FILE,
};
