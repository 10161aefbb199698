diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Nullable<Text>,
        name -> Text,
        role -> Text,
        source -> Nullable<Text>,
        external_id -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        source -> Text,
        source_id -> Text,
        user_id -> Uuid,
        subject -> Text,
        body -> Text,
        language -> Text,
        status -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_messages (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        sender_id -> Uuid,
        sender_type -> Text,
        content -> Text,
        seq -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_nlp (ticket_id) {
        ticket_id -> Uuid,
        category -> Text,
        category_conf -> Float8,
        priority -> Text,
        priority_conf -> Float8,
        triage -> Text,
        triage_conf -> Float8,
        summary -> Text,
        suggested_response -> Text,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    kb_articles (id) {
        id -> Uuid,
        title -> Jsonb,
        body -> Jsonb,
        category -> Text,
        kind -> Text,
        keywords -> Array<Text>,
        is_published -> Bool,
        owner_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(tickets -> users (user_id));
diesel::joinable!(ticket_messages -> tickets (ticket_id));
diesel::joinable!(ticket_nlp -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    tickets,
    ticket_messages,
    ticket_nlp,
    kb_articles,
);
