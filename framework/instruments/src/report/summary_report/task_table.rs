use tabled::Tabled;

#[derive(Tabled, Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub task_name: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[tabled(display = "float2")]
    pub avg_time_ms: f64,
    #[tabled(display = "float2")]
    pub min_time_ms: f64,
    #[tabled(display = "float2")]
    pub max_time_ms: f64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
