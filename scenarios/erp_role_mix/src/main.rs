use stampede_runner::prelude::*;

const HOST: &str = "http://14.99.126.171";
const PASSWORD: &str = "Agnikul_1";

fn login() -> TaskDefinition {
    TaskDefinition::new(
        "{{identifier}}{{role}}- Login",
        RequestTemplate::post("/api/method/login")
            .with_json_body(json!({ "usr": "{{identifier}}", "pwd": "{{secret}}" })),
    )
    .with_success(SuccessPredicate::json_field_equals("/message", "Logged In"))
}

fn identity_probe() -> TaskDefinition {
    TaskDefinition::new(
        "{{identifier}}{{role}}- Logged User",
        RequestTemplate::get("/api/method/frappe.auth.get_logged_user"),
    )
}

fn assignments(kind: &str) -> TaskDefinition {
    TaskDefinition::new(
        format!("{{{{identifier}}}}{{{{role}}}}- {kind} Assignments"),
        RequestTemplate::get("/api/method/hr_operations.v2.core.factory.api.get_data")
            .with_query("key", "ls_assignments")
            .with_query("page", "1")
            .with_query("limit", "20")
            .with_query("query", "")
            .with_query("assignment_type", kind),
    )
    .with_weight(2)
}

fn hr_operations() -> TaskList {
    TaskList::weighted([
        TaskDefinition::new(
            "{{identifier}}{{role}}- QA",
            RequestTemplate::get("/api/method/hr_operations.v2.addon.qa"),
        ),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Status Counts",
            RequestTemplate::get("/api/method/hr_operations.v2.counts.status"),
        ),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Headcount",
            RequestTemplate::get("/api/method/hr_operations.v2.hc.get_headcount"),
        ),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Departments",
            RequestTemplate::get("/api/method/hr_operations.v2.addon.list_depts")
                .with_query("query", "")
                .with_query("page", "1"),
        ),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Attendance Stats",
            RequestTemplate::get("/api/method/hr_operations.v2.timeline.attendance_stats"),
        ),
        assignments("Onboarding"),
        assignments("Deboarding"),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Employees",
            RequestTemplate::get("/api/method/hr_operations.v2.core.factory.api.get_data")
                .with_query("key", "ls_employees")
                .with_query("page", "1")
                .with_query("limit", "20")
                .with_query("query", ""),
        )
        .with_weight(3),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Reports",
            RequestTemplate::get("/api/method/hr_operations.v2.core.factory.api.get_data")
                .with_query("key", "ls_reports")
                .with_query("page", "1")
                .with_query("limit", "20")
                .with_query("query", ""),
        ),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Holidays",
            RequestTemplate::get("/api/method/hr_operations.v2.addon.list_holidays")
                .with_query("page", "1")
                .with_query("limit", "1")
                .with_query("query", "2025"),
        ),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Notice Board",
            RequestTemplate::get("/api/method/hr_operations.v2.addon.nb_stats"),
        ),
        TaskDefinition::new(
            "{{identifier}}{{role}}- Create Assignment",
            RequestTemplate::post("/api/method/hr_operations.v2.core.factory.api.post_data")
                .with_json_body(json!({
                    "key": "assignment",
                    "data": {
                        "assignment_type": "Onboarding",
                        "title": "Load test {{nonce}}",
                        "assigned_by": "{{identifier}}",
                    },
                })),
        ),
    ])
}

fn hr_user(name: &str, identifier: &str, role: &str, spawn_weight: u32) -> UserType {
    UserType::new(name)
        .with_host(HOST)
        .with_credential(identifier, PASSWORD)
        .with_role(identifier, role)
        .with_default_role("Unknown")
        .use_login(login())
        .use_identity_probe(identity_probe())
        .use_tasks(hr_operations())
        .with_spawn_weight(spawn_weight)
        .with_think_time(ThinkTime::between_secs(1, 3))
}

fn main() -> StampedeResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_default_duration_s(60)
        .with_default_users_per_type(1)
        .use_user_type(hr_user("functional_lead", "emp23@erp.in", " (FL) ", 1))
        .use_user_type(hr_user("super_admin", "emp1@erp.in", " (SA) ", 1))
        .use_user_type(hr_user("functional_user", "emp73@erp.in", " (FU) ", 2));

    run(builder)?;

    Ok(())
}
