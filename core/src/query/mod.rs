//! Query descriptors, predicates and the SQL grammar that compiles them.

mod descriptor;
mod grammar;
mod predicate;
mod statement;

pub use descriptor::{Column, Direction, Join, JoinKind, MAX_ROWS, Order, Query};
pub use grammar::{Aggregate, Assignment, Grammar, Row};
pub use predicate::{Boolean, Clause, Operator, Predicate};
pub use statement::Statement;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuarryError;
    use crate::sql::Sql;
    use crate::value::Value;
    use quarry_types::Dialect;

    fn mysql() -> Grammar {
        Grammar::new(Dialect::MySQL)
    }

    #[test]
    fn test_select_star() {
        let stmt = mysql().compile_select(&Query::new("users"));
        assert_eq!(stmt.sql, "SELECT * FROM `users`");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_params_follow_placeholders() {
        let query = Query::new("posts")
            .where_eq("author_id", 7)
            .or_where_group(|q| q.where_op("views", Operator::Gt, 100).where_null("deleted_at"))
            .where_between("score", [1, 5])
            .unwrap()
            .having("total", Operator::Gte, 3)
            .group_by(["author_id"])
            .order_by_raw("FIELD(`id`, ?, ?)", vec![Value::Int(9), Value::Int(8)]);
        let stmt = mysql().compile_select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM `posts` WHERE `author_id` = ? OR (`views` > ? AND `deleted_at` IS NULL) \
             AND `score` BETWEEN ? AND ? GROUP BY `author_id` HAVING `total` >= ? \
             ORDER BY FIELD(`id`, ?, ?)"
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::Int(7),
                Value::Int(100),
                Value::Int(1),
                Value::Int(5),
                Value::Int(3),
                Value::Int(9),
                Value::Int(8),
            ]
        );
    }

    #[test]
    fn test_branching_does_not_leak() {
        let base = Query::new("users").where_eq("active", true);
        let admins = base.clone().where_eq("role", "admin");
        let editors = base.clone().where_eq("role", "editor").limit(5);

        assert_eq!(base.wheres().len(), 1);
        assert_eq!(admins.wheres().len(), 2);
        assert_eq!(editors.get_limit(), Some(5));
        assert_eq!(admins.get_limit(), None);
        assert_eq!(
            mysql().compile_select(&base).sql,
            "SELECT * FROM `users` WHERE `active` = ?"
        );
    }

    #[test]
    fn test_between_requires_two_bounds() {
        let err = Query::new("t").where_between("x", [1]).unwrap_err();
        assert!(matches!(err, QuarryError::InvalidPredicate(_)));
        let err = Query::new("t").where_between("x", [1, 2, 3]).unwrap_err();
        assert!(matches!(err, QuarryError::InvalidPredicate(_)));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = Query::new("t").where_cmp("x", "=>", 1).unwrap_err();
        assert!(matches!(err, QuarryError::InvalidPredicate(_)));
    }

    #[test]
    fn test_null_equality_becomes_is_null() {
        let query = Query::new("t")
            .where_eq("a", Value::Null)
            .where_op("b", Operator::NotEq, Value::Null);
        let stmt = mysql().compile_select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM `t` WHERE `a` IS NULL AND `b` IS NOT NULL"
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_empty_in_lists() {
        let none: Vec<i64> = Vec::new();
        let query = Query::new("t")
            .where_in("id", none.clone())
            .or_where_not_in("id", none);
        assert_eq!(
            mysql().compile_select(&query).sql,
            "SELECT * FROM `t` WHERE 0 = 1 OR 1 = 1"
        );
    }

    #[test]
    fn test_offset_without_limit() {
        let query = Query::new("t").offset(20);
        assert_eq!(
            mysql().compile_select(&query).sql,
            "SELECT * FROM `t` LIMIT 18446744073709551615 OFFSET 20"
        );
        assert_eq!(
            Grammar::new(Dialect::SQLite).compile_select(&query).sql,
            "SELECT * FROM `t` LIMIT -1 OFFSET 20"
        );
    }

    #[test]
    fn test_for_page() {
        let query = Query::new("t").for_page(3, 15);
        assert_eq!(query.get_limit(), Some(15));
        assert_eq!(query.get_offset(), Some(30));
        let query = Query::new("t").for_page(0, 15);
        assert_eq!(query.get_offset(), Some(0));
    }

    #[test]
    fn test_for_page_saturates() {
        let query = Query::new("t").for_page(u64::MAX, 10);
        assert_eq!(query.get_offset(), Some(MAX_ROWS));
        assert_eq!(query.get_limit(), Some(10));
        assert_eq!(
            Grammar::new(Dialect::SQLite).compile_select(&query).sql,
            "SELECT * FROM `t` LIMIT 10 OFFSET 9223372036854775807"
        );
        assert_eq!(Query::new("t").limit(u64::MAX).get_limit(), Some(MAX_ROWS));
    }

    #[test]
    fn test_joins_and_select() {
        let query = Query::new("tags")
            .select(["tags.*", "post_tag.post_id as pivot_post_id"])
            .join("post_tag", "tags.id", Operator::Eq, "post_tag.tag_id")
            .where_in("post_tag.post_id", [1, 2])
            .distinct();
        assert_eq!(
            mysql().compile_select(&query).sql,
            "SELECT DISTINCT `tags`.*, `post_tag`.`post_id` AS `pivot_post_id` FROM `tags` \
             INNER JOIN `post_tag` ON `tags`.`id` = `post_tag`.`tag_id` \
             WHERE `post_tag`.`post_id` IN (?, ?)"
        );
    }

    #[test]
    fn test_wrap_wheres_before_scope() {
        let query = Query::new("posts")
            .where_eq("a", 1)
            .or_where_eq("b", 2)
            .wrap_wheres()
            .where_null("deleted_at");
        assert_eq!(
            mysql().compile_select(&query).sql,
            "SELECT * FROM `posts` WHERE (`a` = ? OR `b` = ?) AND `deleted_at` IS NULL"
        );
    }

    #[test]
    fn test_aggregate_drops_order_and_limit() {
        let query = Query::new("posts")
            .where_eq("published", true)
            .order_by_desc("id")
            .limit(10)
            .offset(10);
        let stmt = mysql().compile_aggregate(&query, Aggregate::Count, "*");
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS `aggregate` FROM `posts` WHERE `published` = ?"
        );
        let stmt = mysql().compile_aggregate(&query, Aggregate::Max, "views");
        assert_eq!(
            stmt.sql,
            "SELECT MAX(`views`) AS `aggregate` FROM `posts` WHERE `published` = ?"
        );
    }

    #[test]
    fn test_grouped_aggregate_uses_derived_table() {
        let query = Query::new("posts").group_by(["author_id"]);
        let stmt = mysql().compile_aggregate(&query, Aggregate::Count, "*");
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS `aggregate` FROM (SELECT * FROM `posts` GROUP BY `author_id`) AS `temp_table`"
        );
    }

    #[test]
    fn test_exists() {
        let stmt = mysql().compile_exists(&Query::new("users").where_eq("id", 1));
        assert_eq!(
            stmt.sql,
            "SELECT EXISTS(SELECT * FROM `users` WHERE `id` = ?) AS `exists`"
        );
    }

    #[test]
    fn test_batch_insert() {
        let rows = vec![
            vec![("name".to_string(), Value::from("a")), ("age".to_string(), Value::Int(1))],
            vec![("age".to_string(), Value::Int(2)), ("name".to_string(), Value::from("b"))],
        ];
        let stmt = mysql().compile_insert("users", &rows).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO `users` (`name`, `age`) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            stmt.params,
            vec![Value::from("a"), Value::Int(1), Value::from("b"), Value::Int(2)]
        );
    }

    #[test]
    fn test_batch_insert_rejects_mixed_columns() {
        let rows = vec![
            vec![("name".to_string(), Value::from("a"))],
            vec![("email".to_string(), Value::from("b"))],
        ];
        let err = mysql().compile_insert("users", &rows).unwrap_err();
        assert!(matches!(err, QuarryError::InvalidStatement(_)));
    }

    #[test]
    fn test_empty_insert() {
        let rows = vec![Vec::new()];
        assert_eq!(
            mysql().compile_insert("t", &rows).unwrap().sql,
            "INSERT INTO `t` () VALUES ()"
        );
        assert_eq!(
            Grammar::new(Dialect::SQLite).compile_insert("t", &rows).unwrap().sql,
            "INSERT INTO `t` DEFAULT VALUES"
        );
    }

    #[test]
    fn test_upsert_per_dialect() {
        let rows = vec![vec![
            ("email".to_string(), Value::from("a@x")),
            ("name".to_string(), Value::from("A")),
        ]];
        assert_eq!(
            mysql()
                .compile_upsert("users", &rows, &["email"], &["name"])
                .unwrap()
                .sql,
            "INSERT INTO `users` (`email`, `name`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
        );
        assert_eq!(
            Grammar::new(Dialect::SQLite)
                .compile_upsert("users", &rows, &["email"], &["name"])
                .unwrap()
                .sql,
            "INSERT INTO `users` (`email`, `name`) VALUES (?, ?) ON CONFLICT (`email`) DO UPDATE SET `name` = excluded.`name`"
        );
    }

    #[test]
    fn test_update_param_order() {
        let query = Query::new("posts").where_eq("id", 4).where_eq("version", 2);
        let assignments = vec![
            ("title".to_string(), Assignment::from(Value::from("new"))),
            (
                "views".to_string(),
                Assignment::Raw(Sql::raw_with_bindings("`views` + ?", &[Value::Int(1)])),
            ),
        ];
        let stmt = mysql().compile_update(&query, &assignments).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE `posts` SET `title` = ?, `views` = `views` + ? WHERE `id` = ? AND `version` = ?"
        );
        assert_eq!(
            stmt.params,
            vec![Value::from("new"), Value::Int(1), Value::Int(4), Value::Int(2)]
        );
        assert!(mysql().compile_update(&query, &[]).is_err());
    }

    #[test]
    fn test_delete() {
        let stmt = mysql().compile_delete(&Query::new("posts").where_in("id", [1, 2, 3]));
        assert_eq!(stmt.sql, "DELETE FROM `posts` WHERE `id` IN (?, ?, ?)");
        assert_eq!(stmt.params.len(), 3);
    }
}
