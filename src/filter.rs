//! Composition of LDAP search filters.
use ldap3::ldap_escape;

use crate::claim_type::{ClaimTypeConfig, DirectoryObjectType};

/// Matches user accounts that are not disabled.
pub const ENABLED_USERS_ONLY_FILTER: &str = "(!(userAccountControl:1.2.840.113556.1.4.803:=2))";
/// Matches security groups, leaving out distribution lists.
pub const SECURITY_GROUPS_ONLY_FILTER: &str = "(groupType:1.2.840.113556.1.4.803:=2147483648)";

/// How an attribute value is compared to the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
	/// The value equals the input
	Exact,
	/// The value starts with the input
	StartsWith,
	/// The value contains the input
	Contains,
}

impl MatchMode {
	/// The assertion value of a filter matching `input` in this mode, with
	/// filter metacharacters of the input escaped.
	#[must_use]
	pub fn pattern(self, input: &str) -> String {
		let escaped = ldap_escape(input);
		match self {
			Self::Exact => escaped.into_owned(),
			Self::StartsWith => format!("{escaped}*"),
			Self::Contains => format!("*{escaped}*"),
		}
	}

	/// Whether `value` matches `input` in this mode, ignoring case.
	#[must_use]
	pub fn matches(self, value: &str, input: &str) -> bool {
		let value = value.to_lowercase();
		let input = input.to_lowercase();
		match self {
			Self::Exact => value == input,
			Self::StartsWith => value.starts_with(&input),
			Self::Contains => value.contains(&input),
		}
	}
}

/// Global filter fragments applied per object type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectFilters {
	/// Only match enabled user accounts
	pub enabled_users_only: bool,
	/// Only match security groups
	pub security_groups_only: bool,
}

impl ObjectFilters {
	/// The fragment to apply to objects of `object_type`, if any.
	fn fragment(self, object_type: DirectoryObjectType) -> Option<&'static str> {
		match object_type {
			DirectoryObjectType::User if self.enabled_users_only => Some(ENABLED_USERS_ONLY_FILTER),
			DirectoryObjectType::Group if self.security_groups_only => {
				Some(SECURITY_GROUPS_ONLY_FILTER)
			}
			_ => None,
		}
	}
}

/// Put a filter fragment in parentheses unless it already is.
fn parenthesize(fragment: &str) -> String {
	let fragment = fragment.trim();
	if fragment.starts_with('(') && fragment.ends_with(')') {
		fragment.to_owned()
	} else {
		format!("({fragment})")
	}
}

/// Combine filters with `operator`, skipping it for a single filter.
fn combine(operator: char, filters: &[String]) -> String {
	match filters {
		[single] => single.clone(),
		filters => format!("({operator}{})", filters.concat()),
	}
}

/// AND the given filters.
#[must_use]
pub fn and(filters: &[String]) -> String {
	combine('&', filters)
}

/// OR the given filters.
#[must_use]
pub fn or(filters: &[String]) -> String {
	combine('|', filters)
}

/// An equality or substring assertion on `attribute`.
#[must_use]
pub fn attribute_match(attribute: &str, input: &str, mode: MatchMode) -> String {
	format!("({attribute}={})", mode.pattern(input))
}

/// The filter finding objects of the class of `config` whose attribute
/// matches `input`.
#[must_use]
pub fn config_filter(
	config: &ClaimTypeConfig,
	input: &str,
	mode: MatchMode,
	object_filters: ObjectFilters,
) -> String {
	let mut filters = vec![
		format!("(objectClass={})", config.directory_object_class),
		attribute_match(&config.directory_object_attribute, input, mode),
	];
	filters.extend(restrictions(config, object_filters));
	and(&filters)
}

/// The filters an object must satisfy for `config` beyond its class and
/// attribute match: the row's additional filter and the global fragment of
/// its object type. These cannot be checked on a returned entry.
#[must_use]
pub fn restrictions(config: &ClaimTypeConfig, object_filters: ObjectFilters) -> Vec<String> {
	let mut filters = Vec::new();
	if let Some(additional) = config.additional_filter() {
		filters.push(parenthesize(additional));
	}
	if let Some(fragment) = object_filters.fragment(config.directory_object_type) {
		filters.push(fragment.to_owned());
	}
	filters
}

/// The filter of a whole query against one connection: any of the
/// per-configuration filters, restricted by the connection's own filter.
#[must_use]
pub fn connection_filter(config_filters: &[String], connection_filter: Option<&str>) -> String {
	let any = or(config_filters);
	match connection_filter.filter(|filter| !filter.trim().is_empty()) {
		Some(filter) => and(&[any, parenthesize(filter)]),
		None => any,
	}
}

#[cfg(test)]
mod tests {
	use super::{
		config_filter, connection_filter, restrictions, MatchMode, ObjectFilters,
		ENABLED_USERS_ONLY_FILTER, SECURITY_GROUPS_ONLY_FILTER,
	};
	use crate::claim_type::{ClaimTypeConfig, DirectoryObjectType};

	#[test]
	fn input_is_escaped() {
		assert_eq!(MatchMode::Exact.pattern("a*(b)\\"), "a\\2a\\28b\\29\\5c");
		assert_eq!(MatchMode::StartsWith.pattern("j(o"), "j\\28o*");
		assert_eq!(MatchMode::Contains.pattern("jo"), "*jo*");
	}

	#[test]
	fn matching_ignores_case() {
		assert!(MatchMode::Exact.matches("Alice@Contoso.com", "alice@contoso.com"));
		assert!(MatchMode::StartsWith.matches("Alice", "al"));
		assert!(!MatchMode::StartsWith.matches("Alice", "li"));
		assert!(MatchMode::Contains.matches("Alice", "LI"));
	}

	#[test]
	fn config_filters() {
		let config = ClaimTypeConfig {
			directory_object_additional_filter: Some("department=IT".to_owned()),
			..ClaimTypeConfig::new("upn", DirectoryObjectType::User, "user", "userPrincipalName")
		};
		let filters = ObjectFilters { enabled_users_only: true, security_groups_only: true };
		assert_eq!(
			config_filter(&config, "al*", MatchMode::StartsWith, filters),
			format!(
				"(&(objectClass=user)(userPrincipalName=al\\2a*)(department=IT){ENABLED_USERS_ONLY_FILTER})"
			)
		);

		let group = ClaimTypeConfig::new("role", DirectoryObjectType::Group, "group", "cn");
		assert_eq!(
			config_filter(&group, "admins", MatchMode::Exact, ObjectFilters::default()),
			"(&(objectClass=group)(cn=admins))"
		);
	}

	#[test]
	fn restrictions_cover_filters_and_fragments() {
		let filters = ObjectFilters { enabled_users_only: false, security_groups_only: true };
		let user = ClaimTypeConfig {
			directory_object_additional_filter: Some(" (department=IT) ".to_owned()),
			..ClaimTypeConfig::new("email", DirectoryObjectType::User, "user", "mail")
		};
		assert_eq!(restrictions(&user, filters), vec!["(department=IT)".to_owned()]);

		let group = ClaimTypeConfig::new("role", DirectoryObjectType::Group, "group", "cn");
		assert_eq!(restrictions(&group, filters), vec![SECURITY_GROUPS_ONLY_FILTER.to_owned()]);
		assert!(restrictions(&group, ObjectFilters::default()).is_empty());
	}

	#[test]
	fn connection_filters() {
		let filters = vec!["(a=1)".to_owned(), "(b=2)".to_owned()];
		assert_eq!(connection_filter(&filters, None), "(|(a=1)(b=2))");
		assert_eq!(connection_filter(&filters[..1], Some("  ")), "(a=1)");
		assert_eq!(connection_filter(&filters[..1], Some("c=3")), "(&(a=1)(c=3))");
	}
}
