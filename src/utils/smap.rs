// Shallow map and fold over the immediate children of a node. Passes over the IR use these to
// visit the variable names an expression or instruction refers to without spelling out every
// variant of the enumeration.

use std::convert::Infallible;

pub trait SMapAccum<T> {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<(A, T), E>
    ) -> Result<(A, Self), E> where Self: Sized;

    fn smap_accum_l<A>(self, acc: A, f: impl Fn(A, T) -> (A, T)) -> (A, Self) where Self: Sized {
        match self.smap_accum_l_result(Ok::<A, Infallible>(acc), |acc, t| Ok(f(acc, t))) {
            Ok(r) => r,
            Err(e) => match e {}
        }
    }

    fn smap(self, f: impl Fn(T) -> T) -> Self where Self: Sized {
        let (_, res) = self.smap_accum_l((), |_, x| ((), f(x)));
        res
    }
}

pub trait SFold<T> {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E>;

    fn sfold<A>(&self, acc: A, f: impl Fn(A, &T) -> A) -> A {
        match self.sfold_result(Ok::<A, Infallible>(acc), |acc, t| Ok(f(acc, t))) {
            Ok(r) => r,
            Err(e) => match e {}
        }
    }
}

impl<T> SMapAccum<T> for Vec<T> {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<(A, T), E>
    ) -> Result<(A, Self), E> {
        self.into_iter()
            .fold(Ok((acc?, vec![])), |acc, x| {
                let (acc, mut elems) = acc?;
                let (acc, x) = f(acc, x)?;
                elems.push(x);
                Ok((acc, elems))
            })
    }
}

impl<T> SFold<T> for Vec<T> {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E> {
        self.iter().fold(acc, |acc, t| f(acc?, t))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn smap_vec_preserves_order() {
        let v = vec![1, 2, 3].smap(|x| x * 10);
        assert_eq!(v, vec![10, 20, 30]);
    }

    #[test]
    fn sfold_result_stops_at_error() {
        let v = vec![1, 2, 3];
        let r = v.sfold_result(Ok(0), |acc, x| if *x == 2 { Err(acc) } else { Ok(acc + x) });
        assert_eq!(r, Err(1));
    }
}
