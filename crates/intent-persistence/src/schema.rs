//! Esquema Diesel escrito a mano a partir de `migrations/`.

diesel::table! {
    journey_wal (seq) {
        seq -> BigInt,
        execution_id -> Text,
        step_name -> Nullable<Text>,
        from_state -> Nullable<Text>,
        to_state -> Text,
        ts -> Timestamptz,
        payload_ref -> Nullable<Jsonb>,
    }
}

diesel::table! {
    idempotency_ledger (fingerprint) {
        fingerprint -> Text,
        execution_id -> Text,
        claim_token -> Text,
        status -> Text,
        lease_expires_at -> Nullable<Timestamptz>,
        outcome -> Nullable<Jsonb>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    artifacts (artifact_id) {
        artifact_id -> Text,
        artifact_type -> Text,
        tenant_id -> Text,
        lifecycle_state -> Text,
        intent_type -> Text,
        execution_id -> Text,
        semantic_payload -> Jsonb,
        created_at -> Timestamptz,
        reg_seq -> BigInt,
    }
}

diesel::table! {
    artifact_lineage (child_id, parent_id) {
        child_id -> Text,
        parent_id -> Text,
    }
}

diesel::joinable!(artifact_lineage -> artifacts (child_id));

diesel::allow_tables_to_appear_in_same_query!(journey_wal, idempotency_ledger, artifacts, artifact_lineage,);
