use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use quill_core::db::{Connection, ConnectionMethods};
use quill_core::migrations::legacy::{PAGES_TABLE, POSTS_TABLE};
use quill_core::migrations::{schema, MigrationState, Migrator};
use quill_core::post::get_post;
use quill_core::{ContentKind, Error, Post, PostQuery, PostStatus, PostType, Step};
use quill_test_helper::*;

fn legacy_connection() -> Connection {
    let conn = sqlite_connection();
    create_legacy_schema(&conn);
    conn
}

fn count(conn: &Connection, post_type: &str, status: Option<PostStatus>) -> i64 {
    let mut query = PostQuery::new().post_type(post_type);
    if let Some(status) = status {
        query = query.status(status);
    }
    query.count(conn).unwrap()
}

#[test]
fn counts_survive_migration() {
    let mut conn = legacy_connection();
    for i in 0..5 {
        insert_legacy_post(&conn, &format!("Post {i}"), &format!("post-{i}"), i % 2 == 0);
    }
    for i in 0..4 {
        insert_legacy_page(&conn, &format!("Page {i}"), &format!("page-{i}"), "full-width", false);
    }

    let mut migrator = Migrator::without_backup();
    let report = migrator.run(&mut conn).unwrap();
    assert_eq!(migrator.state(), MigrationState::Migrated);
    assert_eq!(report.posts, 5);
    assert_eq!(report.published_posts, 3);
    assert_eq!(report.pages, 4);
    assert_eq!(report.post_types_added, 3);

    assert_eq!(count(&conn, "post", None), 5);
    assert_eq!(count(&conn, "post", Some(PostStatus::Publish)), 3);
    assert_eq!(count(&conn, "page", None), 4);
    assert!(!conn.has_table(POSTS_TABLE).unwrap());
    assert!(!conn.has_table(PAGES_TABLE).unwrap());
    assert!(schema::is_applied(&conn, "unify_content").unwrap());
    assert_eq!(PostType::all(&conn).unwrap().len(), 3);
}

#[test]
fn published_legacy_post_becomes_publish() {
    let mut conn = legacy_connection();
    let legacy_id = insert_legacy_post(&conn, "Hello", "hello", true);
    insert_legacy_post(&conn, "Draft", "draft", false);
    Migrator::without_backup().run(&mut conn).unwrap();

    let post = get_post(&conn, "hello").unwrap();
    assert_eq!(post.id, legacy_id);
    assert_eq!(post.post_type, ContentKind::Post);
    assert_eq!(post.post_status, PostStatus::Publish);
    assert_eq!(post.published_at, Some(post.created_at));
    assert_eq!(post.author, "Admin");
    assert_eq!(post.tag_list(), vec!["legacy", "imported"]);
    assert_eq!(post.excerpt.as_deref(), Some("About Hello"));

    let draft = Post::get_by_slug(&conn, "draft").unwrap();
    assert_eq!(draft.post_status, PostStatus::Draft);
    assert_eq!(draft.published_at, None);
}

#[test]
fn page_fields_move_to_meta() {
    let mut conn = legacy_connection();
    insert_legacy_page(&conn, "About", "about", "full-width", true);
    insert_legacy_page(&conn, "Contact", "contact", "sidebar-right", false);
    let report = Migrator::without_backup().run(&mut conn).unwrap();
    // layout, content_type, show_in_nav and nav_order for each page
    assert_eq!(report.meta_rows, 8);

    let about = Post::get_by_slug(&conn, "about").unwrap();
    assert_eq!(about.post_type, ContentKind::Page);
    assert_eq!(about.post_status, PostStatus::Publish);
    assert_eq!(about.get_meta(&conn, "layout").unwrap().as_deref(), Some("full-width"));
    assert_eq!(about.get_meta(&conn, "show_in_nav").unwrap().as_deref(), Some("true"));
    assert_eq!(about.get_meta(&conn, "content_type").unwrap().as_deref(), Some("markdown"));
    assert_eq!(about.get_meta_parsed::<i64>(&conn, "nav_order").unwrap().unwrap().unwrap(), 3);
    assert_eq!(about.get_meta(&conn, "sidebar_content").unwrap(), None);

    let contact = Post::get_by_slug(&conn, "contact").unwrap();
    assert_eq!(
        contact.get_meta(&conn, "layout").unwrap().as_deref(),
        Some("sidebar-right")
    );
    assert_eq!(contact.get_meta(&conn, "show_in_nav").unwrap().as_deref(), Some("false"));
}

#[test]
fn colliding_page_slug_is_renamed() {
    let mut conn = legacy_connection();
    insert_legacy_post(&conn, "About", "about", true);
    insert_legacy_page(&conn, "About", "about", "full-width", true);
    let report = Migrator::without_backup().run(&mut conn).unwrap();
    assert_eq!(
        report.renamed_slugs,
        vec![("about".to_string(), "about-2".to_string())]
    );

    let post = Post::get_by_slug(&conn, "about").unwrap();
    assert_eq!(post.post_type, ContentKind::Post);
    let page = Post::get_by_slug(&conn, "about-2").unwrap();
    assert_eq!(page.post_type, ContentKind::Page);
    assert_eq!(page.get_meta(&conn, "legacy_slug").unwrap().as_deref(), Some("about"));
}

#[test]
fn minimal_legacy_columns_are_enough() {
    let mut conn = sqlite_connection();
    conn.execute(
        "CREATE TABLE blog_posts (id INTEGER PRIMARY KEY, title TEXT, slug TEXT, content TEXT, \
             published BOOLEAN, created_at DATETIME);
         CREATE TABLE pages (id INTEGER PRIMARY KEY, title TEXT, slug TEXT, content TEXT, \
             published BOOLEAN, created_at DATETIME);
         INSERT INTO blog_posts VALUES (7, 'Old', 'old', 'Old post', 1, '2020-02-02 10:00:00');
         INSERT INTO pages VALUES (1, 'Home', 'home', 'Welcome', 0, '2020-02-02 10:00:00');",
    )
    .unwrap();
    let report = Migrator::without_backup().run(&mut conn).unwrap();
    assert_eq!(report.meta_rows, 0);

    let old = Post::get(&conn, 7).unwrap();
    assert_eq!(old.updated_at, old.created_at);
    assert_eq!(old.published_at, Some(old.created_at));
    assert!(!old.featured);
    assert!(Post::get_by_slug(&conn, "home").unwrap().get_all_meta(&conn).unwrap().is_empty());
}

#[test]
fn precheck_requires_legacy_tables() {
    let mut conn = sqlite_connection();
    let mut migrator = Migrator::without_backup();
    let err = migrator.run(&mut conn).unwrap_err();
    assert_matches!(err, Error::MigrationPrecheck(_));
    assert_eq!(migrator.state(), MigrationState::Failed(Step::Precheck));
    assert!(!conn.has_table("posts").unwrap());
}

#[test]
fn precheck_requires_columns() {
    let mut conn = sqlite_connection();
    conn.execute(
        "CREATE TABLE blog_posts (id INTEGER PRIMARY KEY, title TEXT);
         CREATE TABLE pages (id INTEGER PRIMARY KEY, title TEXT);",
    )
    .unwrap();
    let err = Migrator::without_backup().run(&mut conn).unwrap_err();
    assert_matches!(err, Error::MigrationPrecheck(msg) if msg.contains("slug"));
}

#[test]
fn precheck_refuses_populated_target() {
    let mut conn = legacy_connection();
    insert_legacy_post(&conn, "Hello", "hello", true);
    setup_db(&conn);
    Post::create(
        &conn,
        quill_core::NewPost::new(ContentKind::Post, "New", "Already here"),
    )
    .unwrap();

    let err = Migrator::without_backup().run(&mut conn).unwrap_err();
    assert_matches!(err, Error::MigrationPrecheck(msg) if msg.contains("posts"));
    assert_eq!(conn.count_rows(POSTS_TABLE).unwrap(), 1);
    assert_eq!(conn.count_rows("posts").unwrap(), 1);
}

#[test]
fn empty_target_tables_are_accepted() {
    let mut conn = legacy_connection();
    insert_legacy_post(&conn, "Hello", "hello", true);
    setup_db(&conn);
    let report = Migrator::without_backup().run(&mut conn).unwrap();
    assert_eq!(report.posts, 1);
    assert_eq!(report.post_types_added, 0);
}

#[test]
fn runs_only_once() {
    let mut conn = legacy_connection();
    let mut migrator = Migrator::without_backup();
    migrator.run(&mut conn).unwrap();
    assert_matches!(migrator.run(&mut conn), Err(Error::Migration(_)));

    create_legacy_schema(&conn);
    let err = Migrator::without_backup().run(&mut conn).unwrap_err();
    assert_matches!(err, Error::MigrationPrecheck(msg) if msg.contains("already"));
}

#[test]
fn failed_step_leaves_legacy_tables_intact() {
    let mut conn = legacy_connection();
    insert_legacy_post(&conn, "Good", "good", true);
    conn.execute(
        "INSERT INTO blog_posts (title, slug, content, published, created_at, updated_at) \
         VALUES ('Bad', 'bad', 'Broken date', 0, 'not-a-date', 'not-a-date');",
    )
    .unwrap();
    insert_legacy_page(&conn, "About", "about", "full-width", true);

    let mut migrator = Migrator::without_backup();
    let err = migrator.run(&mut conn).unwrap_err();
    assert_matches!(err, Error::MigrationStep { step: Step::Transform, .. });
    assert!(err.to_string().contains("step 3"));
    assert_eq!(migrator.state(), MigrationState::Failed(Step::Transform));

    assert_eq!(conn.count_rows(POSTS_TABLE).unwrap(), 2);
    assert_eq!(conn.count_rows(PAGES_TABLE).unwrap(), 1);
    for table in ["posts", "post_types", "post_meta"] {
        assert!(!conn.has_table(table).unwrap(), "{table} left behind");
    }
}

#[test]
fn rollback_needs_a_backup() {
    let mut conn = legacy_connection();
    let mut migrator = Migrator::without_backup();
    migrator.run(&mut conn).unwrap();
    assert_matches!(migrator.rollback(conn), Err(Error::Migration(_)));
    assert_eq!(migrator.state(), MigrationState::Migrated);
}

#[test]
fn taxonomy_tables_become_category_and_tags() {
    let mut conn = sqlite_connection();
    create_taxonomy_schema(&conn);
    insert_tagged_post(&conn, "Hello", "hello", Some("News"), &["rust", "sqlite"]);
    insert_tagged_post(&conn, "Notes", "notes", Some("Diary"), &[]);
    insert_tagged_post(&conn, "Loose", "loose", None, &["rust"]);
    insert_legacy_page(&conn, "About", "about", "full-width", true);

    let report = Migrator::without_backup().run(&mut conn).unwrap();
    assert_eq!(report.posts, 3);

    let hello = get_post(&conn, "hello").unwrap();
    assert_eq!(hello.category.as_deref(), Some("News"));
    assert_eq!(hello.tag_list(), vec!["rust", "sqlite"]);
    let notes = get_post(&conn, "notes").unwrap();
    assert_eq!(notes.category.as_deref(), Some("Diary"));
    assert_eq!(notes.tags, None);
    let loose = get_post(&conn, "loose").unwrap();
    assert_eq!(loose.category, None);
    assert_eq!(loose.tag_list(), vec!["rust"]);

    for table in [POSTS_TABLE, PAGES_TABLE, "post_tags"] {
        assert!(!conn.has_table(table).unwrap(), "{table} left behind");
    }
    assert!(conn.has_table("categories").unwrap());
    assert!(conn.has_table("tags").unwrap());
}

#[test]
fn precheck_refuses_unknown_references() {
    let mut conn = legacy_connection();
    insert_legacy_post(&conn, "Hello", "hello", true);
    conn.execute(
        "CREATE TABLE comments (id INTEGER PRIMARY KEY, \
             post_id INTEGER REFERENCES blog_posts (id), body TEXT);
         INSERT INTO comments (post_id, body) VALUES (1, 'Nice');",
    )
    .unwrap();

    let err = Migrator::without_backup().run(&mut conn).unwrap_err();
    assert_matches!(err, Error::MigrationPrecheck(msg) if msg.contains("comments"));
    assert_eq!(conn.count_rows(POSTS_TABLE).unwrap(), 1);
    assert!(!conn.has_table("posts").unwrap());
}

#[test]
fn database_errors_during_precheck_are_precheck_failures() {
    let mut conn = legacy_connection();
    conn.execute("CREATE TABLE quill_migrations (id INTEGER PRIMARY KEY);")
        .unwrap();
    let mut migrator = Migrator::without_backup();
    let err = migrator.run(&mut conn).unwrap_err();
    assert_matches!(err, Error::MigrationPrecheck(_));
    assert_eq!(migrator.state(), MigrationState::Failed(Step::Precheck));
}

#[test]
fn configured_author_fills_missing_authors() {
    let mut conn = sqlite_connection();
    conn.execute(
        "CREATE TABLE blog_posts (id INTEGER PRIMARY KEY, title TEXT, slug TEXT, content TEXT, \
             published BOOLEAN, created_at DATETIME);
         CREATE TABLE pages (id INTEGER PRIMARY KEY, title TEXT, slug TEXT, content TEXT, \
             published BOOLEAN, created_at DATETIME);
         INSERT INTO blog_posts VALUES (1, 'Old', 'old', 'Old post', 1, '2020-02-02 10:00:00');
         INSERT INTO pages VALUES (1, 'Home', 'home', 'Welcome', 1, '2020-02-02 10:00:00');",
    )
    .unwrap();
    Migrator::without_backup()
        .default_author("Jo")
        .run(&mut conn)
        .unwrap();
    assert_eq!(get_post(&conn, "old").unwrap().author, "Jo");
    assert_eq!(get_post(&conn, "home").unwrap().author, "Jo");
}
