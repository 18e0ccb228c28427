use metrics::{
    log_counter_with_labels,
    register_logbull_counter,
    MetricLabel,
};

use crate::ErrorMetadata;

register_logbull_counter!(
    ERRORS_REPORTED_TOTAL,
    "Number of tagged errors reported, by error class",
    &["code"]
);

pub fn log_error_metadata(em: &ErrorMetadata) {
    log_counter_with_labels(
        &ERRORS_REPORTED_TOTAL,
        1,
        vec![MetricLabel::new_const("code", em.code.metric_tag_value())],
    );
}
