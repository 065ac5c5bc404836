use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use quill_core::db::{Connection, ConnectionMethods};
use quill_core::post::list_posts;
use quill_core::{
    ContentKind, Error, NewPost, Order, Post, PostQuery, PostStatus, ValidationError,
    DEFAULT_AUTHOR,
};
use quill_test_helper::*;

fn create(conn: &Connection, kind: ContentKind, title: &str) -> Post {
    Post::create(conn, NewPost::new(kind, title, format!("Body of {title}"))).unwrap()
}

fn set_published_at(conn: &Connection, id: i64, at: &str) {
    conn.sqlite()
        .execute(
            "UPDATE posts SET published_at = ?1 WHERE id = ?2",
            rusqlite::params![at, id],
        )
        .unwrap();
}

#[test]
fn create_then_get_by_slug_round_trips() {
    let conn = migrated_connection();
    let mut new = NewPost::new(ContentKind::Post, "Hello World", "First post!");
    new.excerpt = Some("The first".to_string());
    new.author = Some("Jo".to_string());
    new.featured = true;
    new.category = Some("news".to_string());
    new.tags = Some("intro, meta".to_string());
    let created = Post::create(&conn, new).unwrap();

    let loaded = Post::get_by_slug(&conn, "hello-world").unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.post_type, ContentKind::Post);
    assert_eq!(loaded.post_status, PostStatus::Draft);
    assert_eq!(loaded.tag_list(), vec!["intro", "meta"]);
    assert_eq!(loaded.published_at, None);
    assert_eq!(Post::get(&conn, created.id).unwrap(), created);
}

#[test]
fn defaults_for_slug_and_author() {
    let conn = migrated_connection();
    let post = create(&conn, ContentKind::Page, "  About Us! ");
    assert_eq!(post.slug, "about-us");
    assert_eq!(post.author, DEFAULT_AUTHOR);
    assert_eq!(post.created_at, post.updated_at);
}

#[test]
fn created_published_has_published_at() {
    let conn = migrated_connection();
    let mut new = NewPost::new(ContentKind::Post, "Live", "Now");
    new.status = PostStatus::Publish;
    let post = Post::create(&conn, new).unwrap();
    assert_eq!(post.published_at, Some(post.created_at));
    assert!(post.is_published());
}

#[test]
fn slug_unique_across_types() {
    let conn = migrated_connection();
    create(&conn, ContentKind::Post, "About");
    let err = Post::create(&conn, NewPost::new(ContentKind::Page, "About", "Page")).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::SlugTaken(s)) if s == "about");
    assert_eq!(conn.count_rows("posts").unwrap(), 1);
}

#[test]
fn rejects_invalid_fields() {
    let conn = migrated_connection();
    let err = Post::create(&conn, NewPost::new(ContentKind::Post, " ", "Body")).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::MissingField("title")));

    let err = Post::create(&conn, NewPost::new(ContentKind::Post, "Title", "")).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::MissingField("content")));

    let mut new = NewPost::new(ContentKind::Post, "Title", "Body");
    new.slug = Some("Not A Slug".to_string());
    let err = Post::create(&conn, new).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::InvalidSlug(_)));

    let err = Post::create(&conn, NewPost::new("testimonial", "Title", "Body")).unwrap_err();
    assert_matches!(
        err,
        Error::Validation(ValidationError::UnknownPostType(name)) if name == "testimonial"
    );
    assert_eq!(conn.count_rows("posts").unwrap(), 0);
}

#[test]
fn missing_posts_are_not_found() {
    let conn = migrated_connection();
    let err = Post::get_by_slug(&conn, "nope").unwrap_err();
    assert!(err.is_not_found());
    assert_matches!(Post::try_get_by_slug(&conn, "nope"), Ok(None));
    assert_matches!(Post::get(&conn, 42), Err(Error::NotFound { kind: "post", .. }));
}

#[test]
fn published_at_is_set_once() {
    let conn = migrated_connection();
    let mut post = create(&conn, ContentKind::Post, "Hello");
    assert_eq!(post.published_at, None);

    post.transition_status(&conn, PostStatus::Publish).unwrap();
    let first = post.published_at.expect("published_at set on publish");
    assert!(post.updated_at >= post.created_at);

    post.transition_status(&conn, PostStatus::Draft).unwrap();
    assert_eq!(post.published_at, Some(first));
    post.transition_status(&conn, PostStatus::Publish).unwrap();
    assert_eq!(post.published_at, Some(first));

    let stored = Post::get(&conn, post.id).unwrap();
    assert_eq!(stored, post);
}

#[test]
fn publishing_a_stale_copy_keeps_first_published_at() {
    let conn = migrated_connection();
    let mut post = create(&conn, ContentKind::Post, "Hello");
    let mut stale = post.clone();

    post.transition_status(&conn, PostStatus::Publish).unwrap();
    set_published_at(&conn, post.id, "2024-01-01 00:00:00");
    post.transition_status(&conn, PostStatus::Draft).unwrap();
    let first = post.published_at.unwrap();
    assert_eq!(first.to_string(), "2024-01-01 00:00:00");

    assert_eq!(stale.published_at, None);
    stale.transition_status(&conn, PostStatus::Publish).unwrap();
    assert_eq!(stale.published_at, Some(first));
    assert_eq!(Post::get(&conn, post.id).unwrap().published_at, Some(first));
}

#[test]
fn transition_of_deleted_post_is_not_found() {
    let conn = migrated_connection();
    let mut post = create(&conn, ContentKind::Post, "Gone");
    post.clone().delete(&conn).unwrap();
    assert_matches!(
        post.transition_status(&conn, PostStatus::Publish),
        Err(Error::NotFound { kind: "post", .. })
    );
}

#[test]
fn transition_updates_updated_at() {
    let conn = migrated_connection();
    let mut post = create(&conn, ContentKind::Post, "Pending");
    let before = post.updated_at;
    post.transition_status(&conn, PostStatus::Pending).unwrap();
    assert_eq!(post.post_status, PostStatus::Pending);
    assert!(post.updated_at >= before);
    assert_eq!(post.published_at, None);
}

#[test]
fn update_persists_editable_fields() {
    let conn = migrated_connection();
    let mut post = create(&conn, ContentKind::Post, "Draft Title");
    create(&conn, ContentKind::Post, "Taken");

    post.title = "Final Title".to_string();
    post.slug = "final-title".to_string();
    post.tags = Some("a,b".to_string());
    post.update(&conn).unwrap();
    assert_eq!(Post::get_by_slug(&conn, "final-title").unwrap(), post);

    // Saving again under its own slug is fine.
    post.update(&conn).unwrap();

    post.slug = "taken".to_string();
    let err = post.update(&conn).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::SlugTaken(_)));
}

#[test]
fn pages_nest() {
    let conn = migrated_connection();
    let about = create(&conn, ContentKind::Page, "About");
    let mut new = NewPost::new(ContentKind::Page, "Team", "The team");
    new.parent = Some(about.id);
    let team = Post::create(&conn, new).unwrap();
    let mut new = NewPost::new(ContentKind::Page, "History", "Our history");
    new.parent = Some(about.id);
    let history = Post::create(&conn, new).unwrap();

    let children = about.children(&conn).unwrap();
    assert_eq!(children, vec![team.clone(), history]);
    assert_eq!(team.ancestors(&conn, 10).unwrap(), vec![about.clone()]);
    assert!(team.ancestors(&conn, 0).unwrap().is_empty());

    let top = PostQuery::new()
        .post_type(ContentKind::Page)
        .parent(None)
        .load(&conn)
        .unwrap();
    assert_eq!(top, vec![about]);
}

#[test]
fn parent_must_be_hierarchical_and_exist() {
    let conn = migrated_connection();
    let post = create(&conn, ContentKind::Post, "Blog");
    let mut new = NewPost::new(ContentKind::Post, "Child", "Body");
    new.parent = Some(post.id);
    let err = Post::create(&conn, new).unwrap_err();
    assert_matches!(
        err,
        Error::Validation(ValidationError::ParentNotHierarchical(t)) if t == "post"
    );

    let mut page = create(&conn, ContentKind::Page, "Page");
    let err = page.set_parent(&conn, Some(999)).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::ParentNotFound(999)));
    assert_eq!(Post::get(&conn, page.id).unwrap().post_parent, None);
}

#[test]
fn parent_cycles_are_rejected() {
    let conn = migrated_connection();
    let mut a = create(&conn, ContentKind::Page, "A");
    let mut b = create(&conn, ContentKind::Page, "B");
    let mut c = create(&conn, ContentKind::Page, "C");
    b.set_parent(&conn, Some(a.id)).unwrap();
    c.set_parent(&conn, Some(b.id)).unwrap();

    let err = a.set_parent(&conn, Some(c.id)).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::ParentCycle(id)) if id == a.id);
    let err = a.set_parent(&conn, Some(a.id)).unwrap_err();
    assert_matches!(err, Error::Validation(ValidationError::ParentCycle(_)));
    assert_eq!(Post::get(&conn, a.id).unwrap().post_parent, None);

    c.set_parent(&conn, None).unwrap();
    a.set_parent(&conn, Some(c.id)).unwrap();
    assert_eq!(
        a.ancestors(&conn, 10).unwrap(),
        vec![Post::get(&conn, c.id).unwrap()]
    );
}

#[test]
fn delete_cascades_meta_and_detaches_children() {
    let conn = migrated_connection();
    let parent = create(&conn, ContentKind::Page, "Parent");
    let mut child = create(&conn, ContentKind::Page, "Child");
    child.set_parent(&conn, Some(parent.id)).unwrap();
    parent.set_meta(&conn, "layout", "sidebar").unwrap();

    parent.delete(&conn).unwrap();
    assert_eq!(conn.count_rows("post_meta").unwrap(), 0);
    assert_eq!(Post::get(&conn, child.id).unwrap().post_parent, None);
}

#[test]
fn listing_filters_and_orders() {
    let conn = migrated_connection();
    let mut old = create(&conn, ContentKind::Post, "Old");
    let mut new = create(&conn, ContentKind::Post, "New");
    let draft = create(&conn, ContentKind::Post, "Draft");
    let mut page = create(&conn, ContentKind::Page, "Page");
    old.transition_status(&conn, PostStatus::Publish).unwrap();
    new.transition_status(&conn, PostStatus::Publish).unwrap();
    page.transition_status(&conn, PostStatus::Publish).unwrap();
    set_published_at(&conn, old.id, "2024-01-01 00:00:00");
    set_published_at(&conn, new.id, "2025-01-01 00:00:00");

    let published = list_posts(
        &conn,
        Some(ContentKind::Post),
        Some(PostStatus::Publish),
        Order::PublishedDesc,
    )
    .unwrap();
    let slugs: Vec<_> = published.iter().map(|p| p.slug.as_str()).collect();
    assert_eq!(slugs, vec!["new", "old"]);

    let drafts = list_posts(&conn, None, Some(PostStatus::Draft), Order::CreatedDesc).unwrap();
    assert_eq!(drafts, vec![draft]);

    let pages = list_posts(&conn, Some(ContentKind::Page), None, Order::TitleAsc).unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(
        PostQuery::new()
            .status(PostStatus::Publish)
            .count(&conn)
            .unwrap(),
        3
    );
    let all = list_posts(&conn, None, None, Order::CreatedAsc).unwrap();
    let slugs: Vec<_> = all.iter().map(|p| p.slug.as_str()).collect();
    assert_eq!(slugs, vec!["old", "new", "draft", "page"]);
}

#[test]
fn featured_lists_published_featured() {
    let conn = migrated_connection();
    for (title, featured, publish) in [
        ("One", true, true),
        ("Two", true, false),
        ("Three", false, true),
        ("Four", true, true),
    ] {
        let mut new = NewPost::new(ContentKind::Post, title, "Body");
        new.featured = featured;
        let mut post = Post::create(&conn, new).unwrap();
        if publish {
            post.transition_status(&conn, PostStatus::Publish).unwrap();
        }
    }
    set_published_at(&conn, 1, "2024-01-01 00:00:00");
    set_published_at(&conn, 4, "2024-02-01 00:00:00");
    let featured = Post::featured(&conn, 3).unwrap();
    let slugs: Vec<_> = featured.iter().map(|p| p.slug.as_str()).collect();
    assert_eq!(slugs, vec!["four", "one"]);
    assert_eq!(Post::featured(&conn, 1).unwrap().len(), 1);
}

#[test]
fn serializes_to_api_shape() {
    let conn = migrated_connection();
    let mut new = NewPost::new(ContentKind::Project, "Quill", "A blog engine");
    new.tags = Some("rust,sqlite".to_string());
    new.status = PostStatus::Publish;
    let post = Post::create(&conn, new).unwrap();

    let json = serde_json::to_value(&post).unwrap();
    assert_eq!(json["slug"], "quill");
    assert_eq!(json["post_type"], "project");
    assert_eq!(json["post_status"], "publish");
    assert_eq!(json["tags"], serde_json::json!(["rust", "sqlite"]));
    let created = json["created_at"].as_str().unwrap();
    let whole_seconds = post.created_at.format("%Y-%m-%dT%H:%M:%S").to_string();
    assert!(created.starts_with(&whole_seconds), "{created}");
    assert!(json["published_at"].is_string());
    assert!(json["excerpt"].is_null());
}

#[test]
fn rolled_back_transaction_discards_writes() {
    let mut conn = migrated_connection();
    let tx = conn.transaction().unwrap();
    let mut post = create_in(&tx, "Temp");
    post.transition_status(&tx, PostStatus::Publish).unwrap();
    tx.rollback().unwrap();
    assert_matches!(Post::try_get_by_slug(&conn, "temp"), Ok(None));

    let tx = conn.transaction().unwrap();
    create_in(&tx, "Kept");
    tx.commit().unwrap();
    assert!(Post::try_get_by_slug(&conn, "kept").unwrap().is_some());
}

fn create_in(conn: &impl ConnectionMethods, title: &str) -> Post {
    Post::create(conn, NewPost::new(ContentKind::Post, title, "Body")).unwrap()
}
