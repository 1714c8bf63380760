// Diesel schema for the dashboard tables.
// Tablas: workflows, workflow_states, workflow_host_maps
use diesel::allow_tables_to_appear_in_same_query;

diesel::table! {
    workflows (wf_id) {
        wf_id -> BigInt,
        wf_uuid -> Text,
        dax_label -> Nullable<Text>,
        dax_version -> Nullable<Text>,
        dax_file -> Nullable<Text>,
        dag_file_name -> Nullable<Text>,
        timestamp -> Nullable<Double>,
        submit_hostname -> Nullable<Text>,
        submit_dir -> Nullable<Text>,
        planner_version -> Nullable<Text>,
        user -> Nullable<Text>,
        grid_dn -> Nullable<Text>,
        argv -> Nullable<Text>,
        db_url -> Nullable<Text>,
        root_wf_id -> Nullable<BigInt>,
    }
}

diesel::table! {
    workflow_states (wf_id, state, timestamp) {
        wf_id -> BigInt,
        state -> Text,
        timestamp -> Double,
        restart_count -> Nullable<Integer>,
        status -> Nullable<Integer>,
    }
}

diesel::table! {
    workflow_host_maps (wf_id, host) {
        wf_id -> BigInt,
        host -> Text,
    }
}

allow_tables_to_appear_in_same_query!(workflows, workflow_states, workflow_host_maps);
