table! {
    confirmation_tokens (id) {
        id -> Text,
        team_id -> Text,
        student_id -> Text,
        expires -> Timestamp,
    }
}

table! {
    courses (id) {
        id -> Text,
        name -> Text,
        min_team_size -> Integer,
        max_team_size -> Integer,
        enabled -> Bool,
    }
}

table! {
    enrollments (course_id, student_id) {
        course_id -> Text,
        student_id -> Text,
    }
}

table! {
    resource_quotas (team_id) {
        team_id -> Text,
        min_vcpu -> Integer,
        max_vcpu -> Integer,
        min_disk -> Integer,
        max_disk -> Integer,
        min_ram -> Integer,
        max_ram -> Integer,
        total_vcpu -> Integer,
        total_disk -> Integer,
        total_ram -> Integer,
        total_slots -> Integer,
        max_active -> Integer,
    }
}

table! {
    students (id) {
        id -> Text,
        name -> Text,
        email -> Text,
    }
}

table! {
    team_members (team_id, student_id) {
        team_id -> Text,
        student_id -> Text,
    }
}

table! {
    teams (id) {
        id -> Text,
        course_id -> Text,
        name -> Text,
        status -> Text,
        proposed_at -> Timestamp,
    }
}

table! {
    virtual_machines (id) {
        id -> Text,
        team_id -> Text,
        vcpu -> Integer,
        disk -> Integer,
        ram -> Integer,
        status -> Text,
        created_at -> Timestamp,
    }
}

table! {
    vm_owners (vm_id, student_id) {
        vm_id -> Text,
        student_id -> Text,
    }
}

joinable!(confirmation_tokens -> students (student_id));
joinable!(confirmation_tokens -> teams (team_id));
joinable!(enrollments -> courses (course_id));
joinable!(enrollments -> students (student_id));
joinable!(resource_quotas -> teams (team_id));
joinable!(team_members -> students (student_id));
joinable!(team_members -> teams (team_id));
joinable!(teams -> courses (course_id));
joinable!(virtual_machines -> teams (team_id));
joinable!(vm_owners -> students (student_id));
joinable!(vm_owners -> virtual_machines (vm_id));

allow_tables_to_appear_in_same_query!(
    confirmation_tokens,
    courses,
    enrollments,
    resource_quotas,
    students,
    team_members,
    teams,
    virtual_machines,
    vm_owners,
);
