//! Application and role selection.

use std::fmt;

use crate::{
    flow::FlowError,
    idp::{AppUrl, IdentityProvider, Lookup, Session},
};

/// How an application or role is picked, decided once from configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Use the configured name verbatim.
    Configured(String),

    /// List the options from the IdP and ask the [`Chooser`].
    Interactive,
}

impl From<Option<String>> for Selection {
    fn from(name: Option<String>) -> Self {
        name.map_or(Self::Interactive, Self::Configured)
    }
}

/// Picks one of several options when an application or role is not configured.
///
/// The trait is implemented for functions taking the kind of thing being chosen and the option
/// labels and returning the chosen index, so a chooser that always takes the first option could
/// look like:
///
/// ```
/// use std::convert::Infallible;
///
/// use gimme_aws_creds::{Chooser, Lookup};
///
/// fn first() -> impl Chooser {
///     |_: Lookup, _: &[String]| Ok::<_, Infallible>(0)
/// }
/// ```
///
/// Choosing blocks the run until it returns; there is no timeout.
pub trait Chooser {
    /// An error that could occur when choosing.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Choose one of `options`, returning its index.
    fn choose(&self, kind: Lookup, options: &[String]) -> Result<usize, Self::Error>;
}

impl<F, E> Chooser for F
where
    F: Fn(Lookup, &[String]) -> Result<usize, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn choose(&self, kind: Lookup, options: &[String]) -> Result<usize, E> {
        self(kind, options)
    }
}

/// A [`Chooser`] for unattended runs, which fails whenever a choice is needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NonInteractive;

impl Chooser for NonInteractive {
    type Error = SelectionRequired;

    fn choose(&self, kind: Lookup, _options: &[String]) -> Result<usize, Self::Error> {
        Err(SelectionRequired(kind))
    }
}

/// The error returned by [`NonInteractive`].
#[derive(Debug)]
pub struct SelectionRequired(Lookup);

impl fmt::Display for SelectionRequired {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "no {} configured and interactive selection is disabled", self.0)
    }
}

impl std::error::Error for SelectionRequired {}

pub(crate) async fn application<I, C>(
    selection: &Selection,
    idp: &I,
    session: &Session,
    chooser: &C,
) -> Result<String, FlowError<C::Error>>
where
    I: IdentityProvider,
    C: Chooser,
{
    match selection {
        Selection::Configured(name) => Ok(name.clone()),
        Selection::Interactive => {
            let labels = idp
                .list_applications(session)
                .await?
                .into_iter()
                .map(|app| app.label)
                .collect();
            choose(chooser, Lookup::Application, labels)
        }
    }
}

pub(crate) async fn role<I, C>(
    selection: &Selection,
    idp: &I,
    session: &Session,
    app: &AppUrl,
    chooser: &C,
) -> Result<String, FlowError<C::Error>>
where
    I: IdentityProvider,
    C: Chooser,
{
    match selection {
        Selection::Configured(name) => Ok(name.clone()),
        Selection::Interactive => {
            let roles = idp.list_roles(session, app).await?;
            choose(chooser, Lookup::Role, roles)
        }
    }
}

fn choose<C: Chooser>(
    chooser: &C,
    kind: Lookup,
    mut options: Vec<String>,
) -> Result<String, FlowError<C::Error>> {
    if options.is_empty() {
        return Err(FlowError::NoChoices(kind));
    }
    let index = chooser
        .choose(kind, &options)
        .map_err(FlowError::Selection)?;
    if index >= options.len() {
        return Err(FlowError::InvalidChoice { kind, index });
    }
    Ok(options.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::{choose, Chooser, NonInteractive, Selection};
    use crate::{flow::FlowError, idp::Lookup};

    fn options() -> Vec<String> {
        vec!["AWS-Dev".to_string(), "AWS-Prod".to_string()]
    }

    #[test]
    fn selection_from_config() {
        assert_eq!(
            Selection::from(Some("AWS-Prod".to_string())),
            Selection::Configured("AWS-Prod".to_string())
        );
        assert_eq!(Selection::from(None), Selection::Interactive);
    }

    #[test]
    fn choose_returns_picked_option() {
        let chooser = |kind: Lookup, options: &[String]| {
            assert_eq!(kind, Lookup::Application);
            assert_eq!(options, ["AWS-Dev", "AWS-Prod"]);
            Ok::<_, Infallible>(1)
        };

        let picked = choose(&chooser, Lookup::Application, options()).unwrap();
        assert_eq!(picked, "AWS-Prod");
    }

    #[test]
    fn choose_rejects_out_of_range_index() {
        let chooser = |_: Lookup, _: &[String]| Ok::<_, Infallible>(2);

        let error = choose(&chooser, Lookup::Role, options()).unwrap_err();
        assert!(matches!(
            error,
            FlowError::InvalidChoice {
                kind: Lookup::Role,
                index: 2
            }
        ));
    }

    #[test]
    fn nothing_to_choose_is_an_error() {
        let error = choose(&NonInteractive, Lookup::Role, Vec::new()).unwrap_err();
        assert!(matches!(error, FlowError::NoChoices(Lookup::Role)));
    }

    #[test]
    fn non_interactive_refuses() {
        let error = NonInteractive.choose(Lookup::Role, &options()).unwrap_err();
        assert_eq!(
            error.to_string(),
            "no role configured and interactive selection is disabled"
        );
    }
}
